//! The writable side of a unit.
//!
//! Writes are queued without bound; the high-water mark is advisory. Once
//! the number of pending writes (queued plus the one in flight) reaches the
//! mark, `write` returns `false` and the writer is expected to wait for
//! drain. Drain fires when the pending count falls back to zero.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::trace;

use super::control::Control;
use super::events::StageEvent;
use crate::error::{Error, Result};
use crate::telemetry;

struct Shared<T> {
    state: Mutex<WriteState<T>>,
    high_water_mark: usize,
    wake_worker: Notify,
    drained: Notify,
}

struct WriteState<T> {
    queue: VecDeque<T>,
    in_flight: usize,
    ended: bool,
    needs_drain: bool,
}

impl<T> WriteState<T> {
    fn pending(&self) -> usize {
        self.queue.len() + self.in_flight
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, WriteState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle for writing into a unit.
///
/// Clones share the same queue.
pub struct Writable<T> {
    shared: Arc<Shared<T>>,
    control: Control,
}

/// The worker's end of a [`Writable`].
pub(crate) struct Inbox<T> {
    shared: Arc<Shared<T>>,
    control: Control,
}

pub(crate) fn channel<T>(high_water_mark: usize, control: Control) -> (Writable<T>, Inbox<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(WriteState {
            queue: VecDeque::new(),
            in_flight: 0,
            ended: false,
            needs_drain: false,
        }),
        high_water_mark,
        wake_worker: Notify::new(),
        drained: Notify::new(),
    });
    (
        Writable {
            shared: shared.clone(),
            control: control.clone(),
        },
        Inbox { shared, control },
    )
}

impl<T> Writable<T> {
    /// Queue an item.
    ///
    /// Returns `Ok(false)` when the caller should wait for
    /// [`drain`](Self::drain) before writing more. The item is accepted
    /// either way.
    pub fn write(&self, item: T) -> Result<bool> {
        if self.control.is_destroyed() {
            return Err(Error::Destroyed);
        }
        let pending = {
            let mut state = self.shared.lock();
            if state.ended {
                return Err(Error::WriteAfterEnd);
            }
            state.queue.push_back(item);
            let pending = state.pending();
            if pending >= self.shared.high_water_mark {
                state.needs_drain = true;
            }
            pending
        };
        self.shared.wake_worker.notify_one();
        trace!(stage = %self.control.name(), pending, "write");
        Ok(pending < self.shared.high_water_mark)
    }

    /// Wait until a previously congested writable drains.
    ///
    /// Returns immediately when no drain is pending, and as soon as the unit
    /// is destroyed.
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.shared.lock().needs_drain || self.control.is_destroyed() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.control.cancelled() => return,
            }
        }
    }

    /// Write an item, waiting for drain if the write signalled congestion.
    pub async fn send(&self, item: T) -> Result<()> {
        if !self.write(item)? {
            self.drain().await;
            if self.control.is_destroyed() {
                return Err(Error::Destroyed);
            }
        }
        Ok(())
    }

    /// Signal end of input. Queued items are still processed.
    pub fn end(&self) {
        self.shared.lock().ended = true;
        self.shared.wake_worker.notify_one();
        trace!(stage = %self.control.name(), "end of input");
    }

    /// Pending writes: queued items plus the one being processed
    pub fn writable_length(&self) -> usize {
        self.shared.lock().pending()
    }

    /// Whether a write signalled congestion that has not drained yet
    pub fn needs_drain(&self) -> bool {
        self.shared.lock().needs_drain
    }

    /// Whether `end()` was called
    pub fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }

    /// Whether the owning unit was destroyed
    pub fn is_destroyed(&self) -> bool {
        self.control.is_destroyed()
    }

    /// The configured high-water mark
    pub fn high_water_mark(&self) -> usize {
        self.shared.high_water_mark
    }
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            control: self.control.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writable")
            .field("stage", &self.control.name())
            .field("pending", &self.writable_length())
            .field("high_water_mark", &self.shared.high_water_mark)
            .finish()
    }
}

impl<T> Inbox<T> {
    /// Take the next queued item, marking it in flight.
    ///
    /// Returns `None` once input ended and the queue is empty, or as soon as
    /// the unit is destroyed.
    pub(crate) async fn next(&self) -> Option<T> {
        loop {
            if self.control.is_destroyed() {
                return None;
            }
            {
                let mut state = self.shared.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(item);
                }
                if state.ended {
                    return None;
                }
            }
            tokio::select! {
                _ = self.shared.wake_worker.notified() => {}
                _ = self.control.cancelled() => return None,
            }
        }
    }

    /// Mark the in-flight item as done, firing drain when nothing is pending.
    pub(crate) fn complete(&self) {
        let drained = {
            let mut state = self.shared.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.needs_drain && state.pending() == 0 {
                state.needs_drain = false;
                true
            } else {
                false
            }
        };
        if drained {
            trace!(stage = %self.control.name(), "drain");
            telemetry::record_drain(self.control.name());
            self.control.emit(StageEvent::Drain);
            self.shared.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageConfig;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn pair(hwm: usize) -> (Writable<u32>, Inbox<u32>, Control) {
        let control = Control::new(&StageConfig::default(), None);
        let (writable, inbox) = channel(hwm, control.clone());
        (writable, inbox, control)
    }

    #[tokio::test]
    async fn test_write_signals_congestion_at_high_water_mark() {
        let (writable, _inbox, _control) = pair(2);

        assert!(assert_ok!(writable.write(1)));
        assert!(!assert_ok!(writable.write(2)));
        assert!(writable.needs_drain());
        // Still accepted past the mark
        assert!(!assert_ok!(writable.write(3)));
        assert_eq!(writable.writable_length(), 3);
    }

    #[tokio::test]
    async fn test_drain_fires_only_when_nothing_is_pending() {
        let (writable, inbox, control) = pair(2);
        let mut events = control.subscribe();

        writable.write(1).unwrap();
        writable.write(2).unwrap();

        assert_eq!(inbox.next().await, Some(1));
        inbox.complete();
        assert!(writable.needs_drain());
        assert_eq!(inbox.next().await, Some(2));
        // In flight still counts as pending
        assert_eq!(writable.writable_length(), 1);
        assert!(writable.needs_drain());
        inbox.complete();

        assert!(!writable.needs_drain());
        assert_eq!(writable.writable_length(), 0);
        assert!(matches!(events.recv().await.unwrap(), StageEvent::Drain));
    }

    #[tokio::test]
    async fn test_drain_waits_for_worker() {
        let (writable, inbox, _control) = pair(1);
        assert!(!writable.write(7).unwrap());

        let worker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let item = inbox.next().await;
            inbox.complete();
            item
        });

        writable.drain().await;
        assert_eq!(writable.writable_length(), 0);
        assert_eq!(worker.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_write_after_end_fails() {
        let (writable, inbox, _control) = pair(4);
        writable.write(1).unwrap();
        writable.end();

        assert!(matches!(assert_err!(writable.write(2)), Error::WriteAfterEnd));
        assert_eq!(inbox.next().await, Some(1));
        inbox.complete();
        assert_eq!(inbox.next().await, None);
    }

    #[tokio::test]
    async fn test_destroy_releases_writer_and_worker() {
        let (writable, inbox, control) = pair(1);
        assert!(!writable.write(1).unwrap());

        control.destroy(None);

        writable.drain().await;
        assert!(matches!(assert_err!(writable.write(2)), Error::Destroyed));
        assert_eq!(inbox.next().await, None);
    }
}
