//! Collaborator traits.
//!
//! A [`Processor`] is the per-item logic a [`Stage`](crate::stage::Stage)
//! runs behind its writable and readable sides. [`Source`] and [`Sink`] are
//! the pull and push adapters used to feed a stage and to drain one.

use crate::error::Result;
use async_trait::async_trait;

/// A processor transforms items, one input at a time.
///
/// Returning an `Err` from [`process`](Processor::process) drops that item
/// and reports the error on the owning stage's event channel; the stage
/// keeps accepting input.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use sluiceway::core::{Processor, Result};
///
/// struct DoubleProcessor;
///
/// #[async_trait]
/// impl Processor for DoubleProcessor {
///     type Input = i32;
///     type Output = i32;
///
///     async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
///         Ok(vec![item * 2])
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send {
    /// The type of items this processor accepts
    type Input: Send + 'static;
    /// The type of items this processor produces
    type Output: Send + 'static;

    /// Process an input item and produce zero or more output items.
    ///
    /// Returning an empty Vec means the item was consumed but produced no output.
    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>>;

    /// Called when upstream is exhausted, allowing final output generation.
    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        Ok(vec![])
    }
}

/// A source generates items on demand.
///
/// Sources return up to `demand` items; an empty Vec means the source is
/// exhausted.
#[async_trait]
pub trait Source: Send {
    /// The type of items this source generates
    type Item: Send + 'static;

    /// Handle demand for up to `demand` items.
    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>>;

    /// Get the next single item (convenience method).
    async fn next(&mut self) -> Result<Option<Self::Item>> {
        let items = self.handle_demand(1).await?;
        Ok(items.into_iter().next())
    }
}

/// A sink consumes items in batches.
#[async_trait]
pub trait Sink: Send {
    /// The type of items this sink accepts
    type Item: Send + 'static;

    /// Write a batch of items (primary method).
    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()>;

    /// Write a single item (convenience method).
    async fn write(&mut self, item: Self::Item) -> Result<()> {
        self.write_batch(vec![item]).await
    }

    /// Called when the upstream readable is exhausted.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
