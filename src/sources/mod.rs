//! Source implementations.
//!
//! Sources answer demand with up to that many items; an empty answer means
//! the source is exhausted. Use [`feed`](crate::pipe::feed) to push a source
//! into a stage's writable side.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::ops::Range;

use crate::core::{Result, Source};

/// A source that yields numbers from a range
pub struct RangeSource {
    range: Range<i64>,
}

impl RangeSource {
    /// Create a new range source
    pub fn new(range: Range<i64>) -> Self {
        Self { range }
    }
}

#[async_trait]
impl Source for RangeSource {
    type Item = i64;

    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>> {
        Ok(self.range.by_ref().take(demand).collect())
    }
}

/// A source that yields items from a vector
pub struct VecSource<T> {
    items: VecDeque<T>,
}

impl<T> VecSource<T> {
    /// Create a new vector source
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Add more items to the source
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Check if the source has more items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the number of remaining items
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl<T: Send + 'static> Source for VecSource<T> {
    type Item = T;

    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>> {
        let take = demand.min(self.items.len());
        Ok(self.items.drain(..take).collect())
    }
}
