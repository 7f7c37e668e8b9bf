//! Sliding and rolling windows.
//!
//! An [`Accumulator`] owns a buffer of events and decides, per event,
//! whether to emit a window and how to mutate the buffer. Windows are
//! bounded by a count, by a numeric field of the event, or by a custom
//! predicate; see [`Window`].
//!
//! - **Sliding**: every event is appended after evicting the events that
//!   no longer fit, and a copy of the whole buffer is emitted each time.
//! - **Rolling**: events accumulate until the next one would not fit; the
//!   buffer is then emitted and cleared, and that event starts the next
//!   window. A non-empty buffer is flushed when input ends.
//!
//! # Examples
//!
//! ```rust,no_run
//! use sluiceway::accumulator::{accumulator, Strategy, Window};
//! use sluiceway::stage::StageConfig;
//!
//! # async fn run() -> sluiceway::Result<()> {
//! let mut windows = accumulator(Strategy::Rolling, Window::count(3), StageConfig::default())?;
//! for i in 0..7 {
//!     windows.send(i).await?;
//! }
//! windows.end();
//! while let Some(window) = windows.read().await {
//!     println!("{:?}", window);
//! }
//! # Ok(())
//! # }
//! ```

mod window;

pub use window::{Strategy, Window};

use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::trace;

use crate::core::{Processor, Result};
use crate::stage::{Stage, StageConfig};
use window::{advance, Slot};

/// A window buffer under one strategy.
#[derive(Debug)]
pub struct Accumulator<T> {
    strategy: Strategy,
    window: Window<T>,
    buffer: VecDeque<Slot<T>>,
}

impl<T: Clone> Accumulator<T> {
    /// Create an empty accumulator. Fails on a zero or non-finite window
    /// length.
    pub fn new(strategy: Strategy, window: Window<T>) -> Result<Self> {
        window.validate()?;
        Ok(Self {
            strategy,
            window,
            buffer: VecDeque::new(),
        })
    }

    /// Feed one event, returning the window it completes, if any.
    ///
    /// An event without the window's key field fails with
    /// [`Error::MissingKey`](crate::Error::MissingKey) and leaves the buffer
    /// untouched.
    pub fn push(&mut self, event: T) -> Result<Option<Vec<T>>> {
        let position = self.window.position(&event)?;
        let buffer = std::mem::take(&mut self.buffer);
        let step = advance(self.strategy, &self.window, buffer, Slot { event, position });
        self.buffer = step.buffer;
        if let Some(emitted) = &step.emitted {
            trace!(strategy = %self.strategy, size = emitted.len(), "window emitted");
        }
        Ok(step.emitted)
    }

    /// Flush at end of input. Only rolling windows hold back a pending
    /// buffer; sliding windows already emitted it.
    pub fn flush(&mut self) -> Option<Vec<T>> {
        match self.strategy {
            Strategy::Rolling if !self.buffer.is_empty() => {
                Some(self.buffer.drain(..).map(|s| s.event).collect())
            }
            _ => None,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn window(&self) -> &Window<T> {
        &self.window
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Runs an [`Accumulator`] inside a stage.
pub struct AccumulatorProcessor<T> {
    accumulator: Accumulator<T>,
}

impl<T: Clone> AccumulatorProcessor<T> {
    pub fn new(accumulator: Accumulator<T>) -> Self {
        Self { accumulator }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Processor for AccumulatorProcessor<T> {
    type Input = T;
    type Output = Vec<T>;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        Ok(self.accumulator.push(item)?.into_iter().collect())
    }

    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(self.accumulator.flush().into_iter().collect())
    }
}

/// Spawn a window stage.
///
/// Events missing the window's key field are reported as errors on the
/// stage's event channel and skipped; the stage keeps accepting input.
pub fn accumulator<T>(
    strategy: Strategy,
    window: Window<T>,
    config: StageConfig,
) -> Result<Stage<T, Vec<T>>>
where
    T: Clone + Send + 'static,
{
    let accumulator = Accumulator::new(strategy, window)?;
    Ok(Stage::new(AccumulatorProcessor::new(accumulator), config))
}

/// Spawn a window stage bounded by `iteratee(incoming, oldest)`.
///
/// The iteratee is a synchronous predicate; see [`Window::iteratee`].
pub fn accumulator_by<T, F>(
    strategy: Strategy,
    iteratee: F,
    config: StageConfig,
) -> Result<Stage<T, Vec<T>>>
where
    T: Clone + Send + 'static,
    F: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    accumulator(strategy, Window::iteratee(iteratee), config)
}
