//! The Stage contract.
//!
//! A [`Stage`] is a bidirectional processing node: a [`Writable`] input side
//! with advisory high-water-mark backpressure, a [`Readable`] output side
//! with a bounded channel, and a [`Control`] carrying lifecycle events and
//! teardown. Stages built with [`Stage::new`] run a
//! [`Processor`](crate::core::Processor) on their own task, one item at a
//! time, in arrival order.
//!
//! Compositions and routers are assembled from the same three parts, so
//! anything that accepts a `Stage` also accepts them.

pub mod config;
pub mod control;
pub mod events;
pub mod readable;
pub mod writable;

pub use config::StageConfig;
pub use control::{Control, ErrorCallback};
pub use events::{EventBus, EventKind, EventScope, StageEvent};
pub use readable::Readable;
pub use writable::Writable;

use tokio::sync::broadcast;
use tracing::debug;

use crate::core::Processor;
use crate::error::{Error, Result};
use crate::telemetry;
use readable::Outbox;
use writable::Inbox;

/// A processing node with a writable input side and a readable output side.
pub struct Stage<I, O> {
    writable: Writable<I>,
    readable: Option<Readable<O>>,
    control: Control,
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Spawn a stage running `processor`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<P>(processor: P, config: StageConfig) -> Self
    where
        P: Processor<Input = I, Output = O> + 'static,
    {
        let control = Control::new(&config, None);
        let (writable, inbox) = writable::channel(config.high_water_mark, control.clone());
        let (outbox, readable) = readable::channel(config.high_water_mark, control.clone());

        debug!(
            stage = %config.name,
            high_water_mark = config.high_water_mark,
            "spawning stage"
        );
        tokio::spawn(run_processor(processor, inbox, outbox, control.clone()));

        Self::from_parts(writable, Some(readable), control)
    }
}

impl<I, O> Stage<I, O> {
    pub(crate) fn from_parts(
        writable: Writable<I>,
        readable: Option<Readable<O>>,
        control: Control,
    ) -> Self {
        Self {
            writable,
            readable,
            control,
        }
    }

    /// Queue an item; `Ok(false)` means wait for [`drain`](Self::drain)
    pub fn write(&self, item: I) -> Result<bool> {
        self.writable.write(item)
    }

    /// Wait until a congested writable side drains
    pub async fn drain(&self) {
        self.writable.drain().await
    }

    /// Write an item, waiting for drain when congested
    pub async fn send(&self, item: I) -> Result<()> {
        self.writable.send(item).await
    }

    /// Signal end of input
    pub fn end(&self) {
        self.writable.end()
    }

    /// Pending writes, including the item in flight
    pub fn writable_length(&self) -> usize {
        self.writable.writable_length()
    }

    /// Read the next output item.
    ///
    /// Returns `None` at end of output, or when the readable side was taken.
    pub async fn read(&mut self) -> Option<O> {
        match self.readable.as_mut() {
            Some(readable) => readable.read().await,
            None => None,
        }
    }

    /// A handle to the writable side
    pub fn writable(&self) -> Writable<I> {
        self.writable.clone()
    }

    /// Take the readable side, e.g. to consume it on another task
    pub fn take_readable(&mut self) -> Option<Readable<O>> {
        self.readable.take()
    }

    /// The lifecycle handle
    pub fn control(&self) -> &Control {
        &self.control
    }

    /// The configured name
    pub fn name(&self) -> &str {
        self.control.name()
    }

    /// Subscribe to this stage's events
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.control.subscribe()
    }

    /// Tear the stage down; see [`Control::destroy`]
    pub fn destroy(&self, error: Option<Error>) {
        self.control.destroy(error)
    }

    /// Wait until the stage's worker has stopped
    pub async fn closed(&self) {
        self.control.closed().await
    }

    /// Split into writable side, readable side (if not taken) and control
    pub fn into_parts(self) -> (Writable<I>, Option<Readable<O>>, Control) {
        (self.writable, self.readable, self.control)
    }
}

impl<I, O> std::fmt::Debug for Stage<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("control", &self.control)
            .field("writable", &self.writable)
            .field("readable", &self.readable.is_some())
            .finish()
    }
}

async fn run_processor<P>(
    mut processor: P,
    inbox: Inbox<P::Input>,
    mut outbox: Outbox<P::Output>,
    control: Control,
) where
    P: Processor,
{
    while let Some(item) = inbox.next().await {
        let result = tokio::select! {
            biased;
            _ = control.cancelled() => break,
            result = processor.process(item) => result,
        };
        match result {
            Ok(outputs) => {
                telemetry::record_processed(control.name());
                if outbox.push_all(outputs).await.is_err() {
                    break;
                }
            }
            // Per-item errors drop the item; the stage keeps going
            Err(error) => control.report(error),
        }
        inbox.complete();
    }

    if !control.is_destroyed() {
        match processor.finish().await {
            Ok(outputs) => {
                let _ = outbox.push_all(outputs).await;
            }
            Err(error) => control.report(error),
        }
        if !control.is_destroyed() {
            control.emit(StageEvent::Finish);
        }
    }

    drop(outbox);
    control.settle();
}
