//! Fanning one input out to per-key pipelines.
//!
//! A [`Demux`] exposes a single writable side. Each item is classified by a
//! key, either a named field of the item or a `key_by` function, and written
//! to the pipeline for that key, which is constructed on first sight and
//! kept for the life of the router. Outputs of all pipelines are merged into
//! one readable side as [`Keyed`] items.
//!
//! When a pipeline signals congestion the router stops taking input until
//! that pipeline drains, so the demux's own writable side stays congested
//! and the shared input stalls. Pipelines for other keys are never paused.
//!
//! Subscriptions follow [`EventKind::demux_scope`]: lifecycle events are the
//! router's own, data and custom events fan in from every pipeline, and
//! `pipe`/`unpipe` are refused.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::fields;
use crate::stage::readable::{self, Outbox};
use crate::stage::writable::{self, Inbox};
use crate::stage::{
    Control, ErrorCallback, EventKind, EventScope, Readable, Stage, StageConfig, StageEvent,
    Writable,
};
use crate::telemetry;

/// A value tagged with the key of the pipeline it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyed<T> {
    pub key: String,
    pub item: T,
}

/// Lifecycle of one per-key pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// No item with this key was seen yet
    Unconstructed,
    /// Accepting writes
    Active,
    /// The last write signalled congestion; the router waits for drain
    Draining,
    /// Ended and closed after the shared input ended
    Finished,
}

/// What a demux subscription yields.
#[derive(Debug)]
pub enum Subscription<O> {
    /// The router's own event channel
    Events(broadcast::Receiver<StageEvent>),
    /// Merged output of every pipeline
    Data(Readable<Keyed<O>>),
    /// Custom events of every pipeline, present and future
    PipelineEvents(broadcast::Receiver<Keyed<StageEvent>>),
}

type Factory<I, O> = Box<dyn FnMut(&str) -> Stage<I, O> + Send>;
type KeyFn<I> = Arc<dyn Fn(&I) -> Result<String> + Send + Sync>;

struct Route<I> {
    writable: Writable<I>,
    control: Control,
    state: PipelineState,
}

type Routes<I> = Arc<Mutex<HashMap<String, Route<I>>>>;

fn lock<I>(routes: &Routes<I>) -> MutexGuard<'_, HashMap<String, Route<I>>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configures a [`Demux`].
pub struct DemuxBuilder<I, O> {
    construct: Factory<I, O>,
    key: Option<KeyFn<I>>,
    key_by: Option<KeyFn<I>>,
    config: StageConfig,
    on_error: Option<ErrorCallback>,
}

impl<I, O> DemuxBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// `construct(key)` builds the pipeline for a newly seen key
    pub fn new<F>(construct: F) -> Self
    where
        F: FnMut(&str) -> Stage<I, O> + Send + 'static,
    {
        Self {
            construct: Box::new(construct),
            key: None,
            key_by: None,
            config: StageConfig::named("demux"),
            on_error: None,
        }
    }

    /// Route by a named field of the item.
    ///
    /// String values are used verbatim, other values as JSON text. Items
    /// without the field are reported as errors and dropped.
    pub fn key<K: Into<String>>(mut self, field: K) -> Self
    where
        I: Serialize,
    {
        let field = field.into();
        self.key = Some(Arc::new(move |item: &I| fields::key_field(item, &field)));
        self
    }

    /// Route by a function of the item
    pub fn key_by<F>(mut self, f: F) -> Self
    where
        F: Fn(&I) -> String + Send + Sync + 'static,
    {
        self.key_by = Some(Arc::new(move |item: &I| Ok(f(item))));
        self
    }

    pub fn config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the router's high-water mark
    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    /// Route pipeline errors, completion and destroy to `f` instead of the
    /// router's event channel
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<Error>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Start the router.
    ///
    /// Fails with [`Error::InvalidArgument`] unless exactly one of
    /// [`key`](Self::key) and [`key_by`](Self::key_by) was given.
    pub fn build(self) -> Result<Demux<I, O>> {
        let key_of = match (self.key, self.key_by) {
            (Some(key_of), None) | (None, Some(key_of)) => key_of,
            (None, None) => {
                return Err(Error::invalid_argument(
                    "demux needs a key field or a key_by function",
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::invalid_argument(
                    "demux takes either a key field or a key_by function, not both",
                ))
            }
        };

        let config = self.config;
        let control = Control::new(&config, self.on_error);
        let (writable, inbox) = writable::channel(config.high_water_mark, control.clone());
        let (outbox, output) = readable::channel(config.high_water_mark, control.clone());
        let (pipeline_events, _) = broadcast::channel(config.event_capacity.max(1));
        let routes: Routes<I> = Arc::new(Mutex::new(HashMap::new()));

        let router = Router {
            construct: self.construct,
            key_of,
            routes: routes.clone(),
            outbox,
            pipeline_events: pipeline_events.clone(),
            control: control.clone(),
            forwarders: Vec::new(),
            relays: Vec::new(),
        };
        tokio::spawn(router.run(inbox));

        debug!(
            demux = %config.name,
            high_water_mark = config.high_water_mark,
            "router started"
        );
        Ok(Demux {
            writable,
            output: Some(output),
            pipeline_events,
            routes,
            control,
        })
    }
}

/// A router with one writable side and lazily built per-key pipelines.
pub struct Demux<I, O> {
    writable: Writable<I>,
    output: Option<Readable<Keyed<O>>>,
    pipeline_events: broadcast::Sender<Keyed<StageEvent>>,
    routes: Routes<I>,
    control: Control,
}

impl<I, O> Demux<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Start configuring a router around `construct(key)`
    pub fn builder<F>(construct: F) -> DemuxBuilder<I, O>
    where
        F: FnMut(&str) -> Stage<I, O> + Send + 'static,
    {
        DemuxBuilder::new(construct)
    }
}

impl<I, O> Demux<I, O> {
    /// Queue an item; `Ok(false)` means wait for [`drain`](Self::drain)
    pub fn write(&self, item: I) -> Result<bool> {
        self.writable.write(item)
    }

    /// Wait until the router accepted everything queued
    pub async fn drain(&self) {
        self.writable.drain().await
    }

    /// Write an item, waiting for drain when congested
    pub async fn send(&self, item: I) -> Result<()> {
        self.writable.send(item).await
    }

    /// End the shared input; every pipeline is ended in turn
    pub fn end(&self) {
        self.writable.end()
    }

    /// Items queued at the router, including the one being routed
    pub fn writable_length(&self) -> usize {
        self.writable.writable_length()
    }

    pub fn writable(&self) -> Writable<I> {
        self.writable.clone()
    }

    /// Read the next merged output item, unless the data side was taken
    pub async fn read(&mut self) -> Option<Keyed<O>> {
        match self.output.as_mut() {
            Some(output) => output.read().await,
            None => None,
        }
    }

    /// Take the merged output
    pub fn take_output(&mut self) -> Option<Readable<Keyed<O>>> {
        self.output.take()
    }

    /// Subscribe to an event by kind.
    ///
    /// `Data` hands out the merged output and can be taken once. `Pipe` and
    /// `Unpipe` fail with [`Error::UnsupportedEvent`].
    pub fn subscribe(&mut self, kind: EventKind) -> Result<Subscription<O>> {
        match kind.demux_scope() {
            EventScope::Local => Ok(Subscription::Events(self.control.subscribe())),
            EventScope::AllPipelines if kind == EventKind::Data => self
                .output
                .take()
                .map(Subscription::Data)
                .ok_or_else(|| Error::invalid_argument("demux output was already taken")),
            EventScope::AllPipelines => {
                Ok(Subscription::PipelineEvents(self.pipeline_events.subscribe()))
            }
            EventScope::Disallowed => Err(Error::UnsupportedEvent(kind.to_string())),
        }
    }

    /// Keys with a constructed pipeline, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.routes).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// State of the pipeline for `key`
    pub fn state(&self, key: &str) -> PipelineState {
        lock(&self.routes)
            .get(key)
            .map_or(PipelineState::Unconstructed, |route| route.state)
    }

    /// Control of the pipeline for `key`, once constructed
    pub fn pipeline(&self, key: &str) -> Option<Control> {
        lock(&self.routes).get(key).map(|route| route.control.clone())
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }

    /// Tear down the router and every pipeline
    pub fn destroy(&self, error: Option<Error>) {
        self.control.destroy(error)
    }

    /// Wait until the router has stopped
    pub async fn closed(&self) {
        self.control.closed().await
    }
}

impl<I, O> std::fmt::Debug for Demux<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demux")
            .field("control", &self.control)
            .field("keys", &self.keys())
            .finish()
    }
}

struct Router<I, O> {
    construct: Factory<I, O>,
    key_of: KeyFn<I>,
    routes: Routes<I>,
    outbox: Outbox<Keyed<O>>,
    pipeline_events: broadcast::Sender<Keyed<StageEvent>>,
    control: Control,
    forwarders: Vec<JoinHandle<()>>,
    relays: Vec<JoinHandle<()>>,
}

impl<I, O> Router<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(mut self, inbox: Inbox<I>) {
        while let Some(item) = inbox.next().await {
            match (self.key_of)(&item) {
                Ok(key) => self.dispatch(key, item).await,
                // The item is dropped; routing continues
                Err(error) => self.control.report(error),
            }
            inbox.complete();
        }
        self.finish().await;
    }

    async fn dispatch(&mut self, key: String, item: I) {
        let existing = lock(&self.routes).get(&key).map(|r| r.writable.clone());
        let writable = match existing {
            Some(writable) => writable,
            None => self.construct_pipeline(&key),
        };

        match writable.write(item) {
            Ok(true) => {}
            Ok(false) => {
                trace!(demux = %self.control.name(), key = %key, "pipeline congested");
                self.set_state(&key, PipelineState::Draining);
                writable.drain().await;
                self.set_state(&key, PipelineState::Active);
            }
            Err(error) => self.control.report(error),
        }
    }

    fn construct_pipeline(&mut self, key: &str) -> Writable<I> {
        let (writable, readable, control) = (self.construct)(key).into_parts();
        self.control.adopt(control.clone());
        if self.control.is_destroyed() {
            control.destroy(None);
        }

        self.relays.push(tokio::spawn(relay_pipeline_events(
            key.to_string(),
            control.subscribe(),
            self.control.clone(),
            self.pipeline_events.clone(),
        )));
        match readable {
            Some(readable) => self.forwarders.push(tokio::spawn(forward_output(
                key.to_string(),
                readable,
                self.outbox.clone(),
            ))),
            None => warn!(
                demux = %self.control.name(),
                key = %key,
                "pipeline readable side was taken; its output is not merged"
            ),
        }

        lock(&self.routes).insert(
            key.to_string(),
            Route {
                writable: writable.clone(),
                control,
                state: PipelineState::Active,
            },
        );
        telemetry::record_pipeline(self.control.name());
        debug!(demux = %self.control.name(), key = %key, "constructed pipeline");
        writable
    }

    fn set_state(&self, key: &str, state: PipelineState) {
        if let Some(route) = lock(&self.routes).get_mut(key) {
            route.state = state;
        }
    }

    async fn finish(self) {
        let Router {
            routes,
            outbox,
            control,
            forwarders,
            relays,
            ..
        } = self;
        drop(outbox);

        if !control.is_destroyed() {
            let pipelines: Vec<(String, Writable<I>, Control)> = lock(&routes)
                .iter()
                .map(|(key, route)| (key.clone(), route.writable.clone(), route.control.clone()))
                .collect();
            debug!(demux = %control.name(), pipelines = pipelines.len(), "ending pipelines");

            for (_, writable, _) in &pipelines {
                writable.end();
            }
            join_all(forwarders).await;
            join_all(pipelines.iter().map(|(_, _, pipeline)| pipeline.closed())).await;
            // Custom events of pipelines are relayed before the router finishes
            join_all(relays).await;

            let mut routes = lock(&routes);
            for (key, _, _) in &pipelines {
                if let Some(route) = routes.get_mut(key) {
                    route.state = PipelineState::Finished;
                }
            }
        }

        if !control.is_destroyed() {
            control.emit(StageEvent::Finish);
            control.complete();
        }
        control.settle();
    }
}

async fn forward_output<O>(
    key: String,
    mut readable: Readable<O>,
    mut outbox: Outbox<Keyed<O>>,
) {
    while let Some(item) = readable.read().await {
        let keyed = Keyed {
            key: key.clone(),
            item,
        };
        if outbox.push(keyed).await.is_err() {
            break;
        }
    }
}

async fn relay_pipeline_events(
    key: String,
    mut events: broadcast::Receiver<StageEvent>,
    demux: Control,
    pipeline_events: broadcast::Sender<Keyed<StageEvent>>,
) {
    loop {
        match events.recv().await {
            Ok(event @ StageEvent::Custom { .. }) => {
                let _ = pipeline_events.send(Keyed {
                    key: key.clone(),
                    item: event,
                });
            }
            Ok(StageEvent::Close) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(demux = %demux.name(), key = %key, missed, "pipeline events lagged");
            }
        }
    }
}
