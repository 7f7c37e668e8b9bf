//! Window strategies and the buffer step function.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fields;

/// How the buffer reacts to an event that would violate the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Evict violating events from the front; emit the whole buffer on every event
    Sliding,
    /// Emit and clear the buffer when an event would violate the window
    Rolling,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sliding => f.write_str("sliding"),
            Strategy::Rolling => f.write_str("rolling"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sliding" => Ok(Strategy::Sliding),
            "rolling" => Ok(Strategy::Rolling),
            other => Err(Error::invalid_argument(format!(
                "unknown window strategy `{}`",
                other
            ))),
        }
    }
}

type Position<T> = Arc<dyn Fn(&T) -> Result<f64> + Send + Sync>;
type Iteratee<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// What bounds a window.
pub enum Window<T> {
    /// At most this many events
    Count(usize),
    /// Events whose numeric field lies within `length` of the newest event's
    Field {
        key: String,
        length: f64,
        position: Position<T>,
    },
    /// `iteratee(incoming, oldest)` returns `true` when `oldest` no longer
    /// belongs in a window with `incoming`
    Iteratee(Iteratee<T>),
}

impl<T> Window<T> {
    /// A window of at most `length` events
    pub fn count(length: usize) -> Self {
        Window::Count(length)
    }

    /// A window spanning `length` units of the numeric field `key`
    pub fn field<K: Into<String>>(key: K, length: f64) -> Self
    where
        T: Serialize + 'static,
    {
        let key = key.into();
        let name = key.clone();
        Window::Field {
            key,
            length,
            position: Arc::new(move |item: &T| fields::numeric_field(item, &name)),
        }
    }

    /// A window bounded by a custom predicate.
    ///
    /// `f(incoming, oldest)` is called synchronously on the stage's worker
    /// task, once per comparison, and must not block. Work that needs to
    /// await belongs in a [`processor_fn`](crate::processors::processor_fn)
    /// stage composed in front of the window, e.g. to attach a computed
    /// position to each event.
    pub fn iteratee<F>(f: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Window::Iteratee(Arc::new(f))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Window::Count(0) => Err(Error::invalid_argument(
                "window length must be at least 1",
            )),
            Window::Field { key, length, .. } if !(length.is_finite() && *length > 0.0) => {
                Err(Error::invalid_argument(format!(
                    "window length for `{}` must be a positive number, got {}",
                    key, length
                )))
            }
            _ => Ok(()),
        }
    }

    /// The event's position on the window axis. Only field windows look at
    /// the event; the others place everything at zero.
    pub(crate) fn position(&self, event: &T) -> Result<f64> {
        match self {
            Window::Field { position, .. } => position(event),
            Window::Count(_) | Window::Iteratee(_) => Ok(0.0),
        }
    }

    fn violated_by(&self, oldest: &Slot<T>, incoming: &Slot<T>, len: usize) -> bool {
        match self {
            Window::Count(length) => len >= *length,
            Window::Field { length, .. } => oldest.position + length <= incoming.position,
            Window::Iteratee(f) => f(&incoming.event, &oldest.event),
        }
    }
}

impl<T> Clone for Window<T> {
    fn clone(&self) -> Self {
        match self {
            Window::Count(length) => Window::Count(*length),
            Window::Field {
                key,
                length,
                position,
            } => Window::Field {
                key: key.clone(),
                length: *length,
                position: position.clone(),
            },
            Window::Iteratee(f) => Window::Iteratee(f.clone()),
        }
    }
}

impl<T> fmt::Debug for Window<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Count(length) => f.debug_tuple("Count").field(length).finish(),
            Window::Field { key, length, .. } => f
                .debug_struct("Field")
                .field("key", key)
                .field("length", length)
                .finish(),
            Window::Iteratee(_) => f.write_str("Iteratee(..)"),
        }
    }
}

/// A buffered event with its position on the window axis.
#[derive(Debug, Clone)]
pub(crate) struct Slot<T> {
    pub(crate) event: T,
    pub(crate) position: f64,
}

/// Result of feeding one event to a buffer.
#[derive(Debug)]
pub(crate) struct Step<T> {
    pub(crate) buffer: VecDeque<Slot<T>>,
    pub(crate) emitted: Option<Vec<T>>,
}

/// Feed `slot` to `buffer` under `strategy`.
///
/// Sliding evicts from the front while the window is violated, appends, and
/// emits a copy of the buffer. Rolling emits and clears the buffer when the
/// incoming event violates the window against the oldest one, then appends.
pub(crate) fn advance<T: Clone>(
    strategy: Strategy,
    window: &Window<T>,
    mut buffer: VecDeque<Slot<T>>,
    slot: Slot<T>,
) -> Step<T> {
    match strategy {
        Strategy::Sliding => {
            while let Some(oldest) = buffer.front() {
                if !window.violated_by(oldest, &slot, buffer.len()) {
                    break;
                }
                buffer.pop_front();
            }
            buffer.push_back(slot);
            let emitted = buffer.iter().map(|s| s.event.clone()).collect();
            Step {
                buffer,
                emitted: Some(emitted),
            }
        }
        Strategy::Rolling => {
            let flush = buffer
                .front()
                .is_some_and(|oldest| window.violated_by(oldest, &slot, buffer.len()));
            let emitted = if flush {
                Some(buffer.drain(..).map(|s| s.event).collect())
            } else {
                None
            };
            buffer.push_back(slot);
            Step { buffer, emitted }
        }
    }
}
