//! Lifecycle and diagnostic events.
//!
//! Every stage owns an [`EventBus`]. Data never travels over it; data goes
//! through the stage's [`Readable`](super::Readable). The bus carries
//! flow-control, termination and error signals, plus named custom events.

use std::fmt;
use tokio::sync::broadcast;

use crate::error::Error;

/// An event emitted on a stage's event channel.
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// Output became available to an idle reader
    Readable,
    /// The writable side accepted everything buffered; writing is safe again
    Drain,
    /// This stage's readable is being piped into a congested destination
    Pause,
    /// The congested destination drained
    Resume,
    /// All input was processed after `end()`
    Finish,
    /// The reader consumed the last output item
    End,
    /// The stage's worker exited (completed or destroyed)
    Close,
    /// A reported error; not fatal by itself
    Error(Error),
    /// A named diagnostic event
    Custom { name: String, detail: String },
}

impl StageEvent {
    /// The kind of this event, used by subscription dispatch.
    pub fn kind(&self) -> EventKind {
        match self {
            StageEvent::Readable => EventKind::Readable,
            StageEvent::Drain => EventKind::Drain,
            StageEvent::Pause => EventKind::Pause,
            StageEvent::Resume => EventKind::Resume,
            StageEvent::Finish => EventKind::Finish,
            StageEvent::End => EventKind::End,
            StageEvent::Close => EventKind::Close,
            StageEvent::Error(_) => EventKind::Error,
            StageEvent::Custom { .. } => EventKind::Custom,
        }
    }

    /// Build a custom event.
    pub fn custom<N: Into<String>, D: Into<String>>(name: N, detail: D) -> Self {
        StageEvent::Custom {
            name: name.into(),
            detail: detail.into(),
        }
    }
}

/// Every event name a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Data,
    Readable,
    Drain,
    Pause,
    Resume,
    Finish,
    End,
    Close,
    Error,
    Pipe,
    Unpipe,
    Custom,
}

/// Where a subscription on a demultiplexer is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    /// Stays on the router's own event channel
    Local,
    /// Fans in from every per-key pipeline, present and future
    AllPipelines,
    /// Meaningless without selecting one per-key pipeline
    Disallowed,
}

impl EventKind {
    /// Dispatch table for subscriptions made on a demultiplexer.
    pub fn demux_scope(self) -> EventScope {
        match self {
            EventKind::Close
            | EventKind::Drain
            | EventKind::Finish
            | EventKind::Pause
            | EventKind::End
            | EventKind::Error
            | EventKind::Readable
            | EventKind::Resume => EventScope::Local,
            EventKind::Data | EventKind::Custom => EventScope::AllPipelines,
            EventKind::Pipe | EventKind::Unpipe => EventScope::Disallowed,
        }
    }

    /// The conventional lowercase event name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Data => "data",
            EventKind::Readable => "readable",
            EventKind::Drain => "drain",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Finish => "finish",
            EventKind::End => "end",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Pipe => "pipe",
            EventKind::Unpipe => "unpipe",
            EventKind::Custom => "custom",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast channel carrying [`StageEvent`]s.
///
/// Subscribers that fall more than `capacity` events behind lose the oldest
/// ones.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StageEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: StageEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
