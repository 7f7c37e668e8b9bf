//! Lifecycle handle shared by a unit's writable side, readable side and
//! worker task.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use super::config::StageConfig;
use super::events::{EventBus, StageEvent};
use crate::error::Error;
use crate::telemetry;

/// Callback receiving member errors, and `None` on clean completion or
/// error-free destroy.
pub type ErrorCallback = Arc<dyn Fn(Option<Error>) + Send + Sync>;

/// Lifecycle handle of a stage, composition or router.
///
/// Cloning is cheap; every clone refers to the same unit.
#[derive(Clone)]
pub struct Control {
    inner: Arc<ControlInner>,
}

struct ControlInner {
    name: String,
    events: EventBus,
    cancel: CancellationToken,
    done: CancellationToken,
    members: Mutex<Vec<Control>>,
    parent: Mutex<Weak<ControlInner>>,
    on_error: Option<ErrorCallback>,
}

impl Control {
    pub(crate) fn new(config: &StageConfig, on_error: Option<ErrorCallback>) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                name: config.name.clone(),
                events: EventBus::new(config.event_capacity),
                cancel: CancellationToken::new(),
                done: CancellationToken::new(),
                members: Mutex::new(Vec::new()),
                parent: Mutex::new(Weak::new()),
                on_error,
            }),
        }
    }

    /// The unit's configured name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.inner.events.subscribe()
    }

    /// Emit an event on this unit's channel
    pub fn emit(&self, event: StageEvent) {
        self.inner.events.emit(event);
    }

    /// Emit a named diagnostic event
    pub fn emit_custom<N: Into<String>, D: Into<String>>(&self, name: N, detail: D) {
        self.emit(StageEvent::custom(name, detail));
    }

    /// Tear down this unit and every member it owns.
    ///
    /// Members are destroyed without an error. The error, if any, goes to
    /// the unit's callback when one was supplied, otherwise it is raised as
    /// if [`report`](Self::report)ed. A [`StageEvent::Close`] follows once the
    /// worker has stopped. Destroying twice is a no-op.
    pub fn destroy(&self, error: Option<Error>) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        debug!(stage = %self.name(), error = ?error, "destroying");

        for member in self.members() {
            member.destroy(None);
        }
        match (&self.inner.on_error, error) {
            (Some(callback), error) => callback(error),
            (None, Some(error)) => self.raise(error),
            (None, None) => {}
        }
        self.inner.cancel.cancel();
    }

    /// Whether [`destroy`](Self::destroy) was called
    pub fn is_destroyed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Whether the worker has stopped
    pub fn is_closed(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    /// Wait until the worker has stopped, after completion or destroy
    pub async fn closed(&self) {
        self.inner.done.cancelled().await
    }

    /// Controls of the stages this unit owns
    pub fn members(&self) -> Vec<Control> {
        self.inner
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    /// Take ownership of `member`: it is destroyed with this unit, and
    /// errors it raises are reported here.
    pub(crate) fn adopt(&self, member: Control) {
        *member
            .inner
            .parent
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(&self.inner);
        self.inner
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(member);
    }

    /// Route an error to the callback, or raise it on this unit.
    pub(crate) fn report(&self, error: Error) {
        warn!(stage = %self.name(), error = %error, "stage error");
        telemetry::record_error(self.name());
        match &self.inner.on_error {
            Some(callback) => callback(Some(error)),
            None => self.raise(error),
        }
    }

    /// Emit on this unit's channel and hand the error to the owning unit.
    ///
    /// The owner receives it synchronously, before this unit completes.
    fn raise(&self, error: Error) {
        let parent = self
            .inner
            .parent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade();
        match parent {
            Some(inner) => {
                self.emit(StageEvent::Error(error.clone()));
                Control { inner }.report(error);
            }
            None => self.emit(StageEvent::Error(error)),
        }
    }

    /// Signal clean completion to the callback.
    pub(crate) fn complete(&self) {
        if let Some(callback) = &self.inner.on_error {
            callback(None);
        }
    }

    /// Mark the worker as stopped.
    pub(crate) fn settle(&self) {
        debug!(stage = %self.name(), destroyed = self.is_destroyed(), "closed");
        self.emit(StageEvent::Close);
        self.inner.done.cancel();
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("name", &self.inner.name)
            .field("destroyed", &self.is_destroyed())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_destroy_propagates_to_members() {
        let parent = Control::new(&StageConfig::named("parent"), None);
        let child = Control::new(&StageConfig::named("child"), None);
        parent.adopt(child.clone());

        parent.destroy(None);

        assert!(parent.is_destroyed());
        assert!(child.is_destroyed());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: ErrorCallback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let control = Control::new(&StageConfig::default(), Some(callback));

        control.destroy(Some(Error::custom("first")));
        control.destroy(Some(Error::custom("second")));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_destroy_error_without_callback_is_emitted() {
        let control = Control::new(&StageConfig::default(), None);
        let mut events = control.subscribe();

        control.destroy(Some(Error::custom("boom")));

        match events.recv().await.unwrap() {
            StageEvent::Error(e) => assert_eq!(e.to_string(), "boom"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_member_errors_are_reported_to_owner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: ErrorCallback = Arc::new(move |error| {
            if error.is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let owner = Control::new(&StageConfig::named("owner"), Some(callback));
        let middle = Control::new(&StageConfig::named("middle"), None);
        let leaf = Control::new(&StageConfig::named("leaf"), None);
        owner.adopt(middle.clone());
        middle.adopt(leaf.clone());

        // Far more than the event channel retains
        for i in 0..500 {
            leaf.report(Error::custom(i.to_string()));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 500);
    }
}
