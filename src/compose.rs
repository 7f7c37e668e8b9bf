//! Chaining stages into one.
//!
//! A [`Compose`] pipes two or more stages together and presents them as a
//! single [`Stage`]: writes go to the first member, reads come from the
//! last. Every link keeps its native backpressure, so a slow member stalls
//! the members before it and, in the end, writers of the composition.
//!
//! ```rust,no_run
//! use sluiceway::compose::Compose;
//! use sluiceway::processors::{batch, debatch};
//! use sluiceway::stage::StageConfig;
//!
//! # async fn run() -> sluiceway::Result<()> {
//! let mut round_trip = Compose::builder(batch::<u32>(4, StageConfig::named("batch")))
//!     .then(debatch(StageConfig::named("debatch")))
//!     .on_error(|error| {
//!         if let Some(error) = error {
//!             eprintln!("member failed: {}", error);
//!         }
//!     })
//!     .build()?;
//!
//! round_trip.send(1).await?;
//! round_trip.end();
//! assert_eq!(round_trip.read().await, Some(1));
//! # Ok(())
//! # }
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipe::pipe;
use crate::stage::readable::{self, Outbox};
use crate::stage::writable::{self, Inbox};
use crate::stage::{Control, ErrorCallback, Readable, Stage, StageConfig, StageEvent, Writable};

type Link = Box<dyn FnOnce(Control) + Send>;

/// Collects the members of a [`Compose`].
pub struct ComposeBuilder<I, O> {
    head: Option<Writable<I>>,
    tail: Option<Readable<O>>,
    members: Vec<Control>,
    links: Vec<Link>,
    config: StageConfig,
    on_error: Option<ErrorCallback>,
    rejected: Option<Error>,
}

impl<I, O> ComposeBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Start a chain with `first`
    pub fn new(first: Stage<I, O>) -> Self {
        let (head, tail, control) = first.into_parts();
        let rejected = tail.is_none().then(|| taken(&control));
        Self {
            head: Some(head),
            tail,
            members: vec![control],
            links: Vec::new(),
            config: StageConfig::named("compose"),
            on_error: None,
            rejected,
        }
    }

    /// Append `next`, piping the current last member into it
    pub fn then<N>(self, next: Stage<O, N>) -> ComposeBuilder<I, N>
    where
        N: Send + 'static,
    {
        let (next_head, next_tail, next_control) = next.into_parts();
        let mut rejected = self.rejected;
        if next_tail.is_none() && rejected.is_none() {
            rejected = Some(taken(&next_control));
        }

        let mut links = self.links;
        if let Some(tail) = self.tail {
            links.push(Box::new(move |composite: Control| {
                tokio::spawn(async move {
                    match pipe(tail, next_head).await {
                        Err(error) if !error.is_destroyed() => composite.report(error),
                        _ => {}
                    }
                });
            }));
        }
        let mut members = self.members;
        members.push(next_control);

        ComposeBuilder {
            head: self.head,
            tail: next_tail,
            members,
            links,
            config: self.config,
            on_error: self.on_error,
            rejected,
        }
    }

    /// Configuration of the composed unit itself
    pub fn config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the composed unit's high-water mark
    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    /// Route member errors, completion and destroy to `f` instead of the
    /// composed unit's event channel.
    ///
    /// `f` receives `Some(error)` for each member error and for a destroy
    /// with an error, `None` on clean completion or error-free destroy.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<Error>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Wire the members together and start forwarding.
    ///
    /// Fails with [`Error::InvalidArgument`] when fewer than two stages were
    /// given; the members are destroyed in that case.
    pub fn build(self) -> Result<Compose<I, O>> {
        let (head, tail) = match (self.rejected, self.head, self.tail) {
            (None, Some(head), Some(tail)) if self.members.len() >= 2 => (head, tail),
            (rejected, _, _) => {
                for member in &self.members {
                    member.destroy(None);
                }
                return Err(rejected.unwrap_or_else(|| {
                    Error::invalid_argument(format!(
                        "compose needs at least 2 stages, got {}",
                        self.members.len()
                    ))
                }));
            }
        };

        let config = self.config;
        let control = Control::new(&config, self.on_error);
        for member in &self.members {
            control.adopt(member.clone());
        }
        let (writable, inbox) = writable::channel(config.high_water_mark, control.clone());
        let (outbox, readable) = readable::channel(config.high_water_mark, control.clone());

        for link in self.links {
            link(control.clone());
        }
        tokio::spawn(forward_head(inbox, head, control.clone()));
        tokio::spawn(forward_tail(tail, outbox, control.clone()));

        debug!(
            compose = %config.name,
            members = self.members.len(),
            high_water_mark = config.high_water_mark,
            "composed"
        );
        Ok(Compose {
            stage: Stage::from_parts(writable, Some(readable), control),
        })
    }
}

impl<T: Send + 'static> ComposeBuilder<T, T> {
    /// Chain same-typed stages in order
    pub fn chain(stages: Vec<Stage<T, T>>) -> Self {
        let mut stages = stages.into_iter();
        match stages.next() {
            Some(first) => stages.fold(Self::new(first), |builder, next| builder.then(next)),
            None => Self {
                head: None,
                tail: None,
                members: Vec::new(),
                links: Vec::new(),
                config: StageConfig::named("compose"),
                on_error: None,
                rejected: None,
            },
        }
    }
}

fn taken(control: &Control) -> Error {
    Error::invalid_argument(format!(
        "readable side of `{}` was already taken",
        control.name()
    ))
}

/// Several stages behaving as one.
///
/// Dereferences to [`Stage`], so it is written to, read from, ended and
/// destroyed like any other stage. Destroying it destroys every member.
pub struct Compose<I, O> {
    stage: Stage<I, O>,
}

impl<I, O> Compose<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Start building a composition from its first member
    pub fn builder(first: Stage<I, O>) -> ComposeBuilder<I, O> {
        ComposeBuilder::new(first)
    }
}

impl<T: Send + 'static> Compose<T, T> {
    /// Compose same-typed stages in order
    pub fn from_stages(stages: Vec<Stage<T, T>>, config: StageConfig) -> Result<Self> {
        ComposeBuilder::chain(stages).config(config).build()
    }
}

impl<I, O> Compose<I, O> {
    /// Re-emit the named custom events of every member on this unit
    pub fn bubble(&self, names: &[&str]) {
        let names: Arc<Vec<String>> = Arc::new(names.iter().map(|n| n.to_string()).collect());
        for member in self.stage.control().members() {
            let events = member.subscribe();
            let composite = self.stage.control().clone();
            let names = names.clone();
            tokio::spawn(async move {
                relay_custom(events, composite, names).await;
            });
        }
    }

    /// Controls of the member stages, first to last
    pub fn members(&self) -> Vec<Control> {
        self.stage.control().members()
    }

    pub fn into_stage(self) -> Stage<I, O> {
        self.stage
    }
}

impl<I, O> Deref for Compose<I, O> {
    type Target = Stage<I, O>;

    fn deref(&self) -> &Self::Target {
        &self.stage
    }
}

impl<I, O> DerefMut for Compose<I, O> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stage
    }
}

impl<I, O> From<Compose<I, O>> for Stage<I, O> {
    fn from(compose: Compose<I, O>) -> Self {
        compose.stage
    }
}

impl<I, O> std::fmt::Debug for Compose<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compose")
            .field("stage", &self.stage)
            .field("members", &self.members().len())
            .finish()
    }
}

async fn forward_head<I>(inbox: Inbox<I>, head: Writable<I>, composite: Control) {
    while let Some(item) = inbox.next().await {
        let sent = head.send(item).await;
        inbox.complete();
        if let Err(error) = sent {
            if !error.is_destroyed() {
                composite.report(error);
            }
            break;
        }
    }
    if !composite.is_destroyed() {
        head.end();
    }
}

async fn forward_tail<O>(mut tail: Readable<O>, mut outbox: Outbox<O>, composite: Control) {
    while let Some(item) = tail.read().await {
        if outbox.push(item).await.is_err() {
            break;
        }
    }
    if !composite.is_destroyed() && !tail.control().is_destroyed() {
        composite.emit(StageEvent::Finish);
        composite.complete();
    }
    drop(outbox);
    composite.settle();
}

async fn relay_custom(
    mut events: broadcast::Receiver<StageEvent>,
    composite: Control,
    names: Arc<Vec<String>>,
) {
    loop {
        match events.recv().await {
            Ok(StageEvent::Custom { name, detail }) => {
                if names.contains(&name) {
                    composite.emit(StageEvent::Custom { name, detail });
                }
            }
            Ok(StageEvent::Close) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(compose = %composite.name(), missed, "member custom events lagged");
            }
        }
    }
}
