//! Collaborator processors.
//!
//! Small one-shot transforms a [`Stage`](crate::stage::Stage) can run. They
//! exist so windows, compositions and routers have something to chain.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::sleep;

use crate::core::{Processor, Result};
use crate::stage::{Stage, StageConfig};

/// A processor that maps items using a function.
pub struct MapProcessor<F, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> U>,
}

impl<F, T, U> MapProcessor<F, T, U> {
    /// Create a new map processor
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, U> Processor for MapProcessor<F, T, U>
where
    F: FnMut(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        Ok(vec![(self.f)(item)])
    }
}

/// A processor that only passes items satisfying a predicate.
pub struct FilterProcessor<F, T> {
    predicate: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> FilterProcessor<F, T> {
    /// Create a new filter processor
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Processor for FilterProcessor<F, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        if (self.predicate)(&item) {
            Ok(vec![item])
        } else {
            Ok(vec![])
        }
    }
}

/// A processor built from an async function.
///
/// An `Err` from the function is reported on the stage and drops the item.
pub struct FnProcessor<F, Fut, T, U> {
    f: F,
    _phantom: PhantomData<fn(T) -> (Fut, U)>,
}

/// Create a processor from an async function returning zero or more outputs
pub fn processor_fn<F, Fut, T, U>(f: F) -> FnProcessor<F, Fut, T, U>
where
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<U>>> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    FnProcessor {
        f,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T, U> Processor for FnProcessor<F, Fut, T, U>
where
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<U>>> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        (self.f)(item).await
    }
}

/// A processor that groups items into batches of a fixed size.
///
/// A partial batch is emitted when input ends.
pub struct BatchProcessor<T> {
    batch_size: usize,
    batch: Vec<T>,
}

impl<T> BatchProcessor<T> {
    /// Create a new batch processor
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch: Vec::new(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Processor for BatchProcessor<T> {
    type Input = T;
    type Output = Vec<T>;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        self.batch.push(item);

        if self.batch.len() >= self.batch_size {
            Ok(vec![std::mem::take(&mut self.batch)])
        } else {
            Ok(vec![])
        }
    }

    async fn finish(&mut self) -> Result<Vec<Self::Output>> {
        if self.batch.is_empty() {
            Ok(vec![])
        } else {
            Ok(vec![std::mem::take(&mut self.batch)])
        }
    }
}

/// A processor that flattens batches back into items
pub struct DebatchProcessor<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> DebatchProcessor<T> {
    /// Create a new debatch processor
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for DebatchProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Processor for DebatchProcessor<T> {
    type Input = Vec<T>;
    type Output = T;

    async fn process(&mut self, items: Self::Input) -> Result<Vec<Self::Output>> {
        Ok(items)
    }
}

/// A processor that holds each item for a fixed delay
pub struct DelayProcessor<T> {
    delay: Duration,
    _phantom: PhantomData<fn(T)>,
}

impl<T> DelayProcessor<T> {
    /// Create a new delay processor
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Processor for DelayProcessor<T> {
    type Input = T;
    type Output = T;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        sleep(self.delay).await;
        Ok(vec![item])
    }
}

/// Spawn a stage mapping each item through `f`
pub fn map<F, T, U>(f: F, config: StageConfig) -> Stage<T, U>
where
    F: FnMut(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
{
    Stage::new(MapProcessor::new(f), config)
}

/// Spawn a stage passing only items satisfying `predicate`
pub fn filter<F, T>(predicate: F, config: StageConfig) -> Stage<T, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    Stage::new(FilterProcessor::new(predicate), config)
}

/// Spawn a stage grouping items into batches of `size`
pub fn batch<T: Send + 'static>(size: usize, config: StageConfig) -> Stage<T, Vec<T>> {
    Stage::new(BatchProcessor::new(size), config)
}

/// Spawn a stage flattening batches
pub fn debatch<T: Send + 'static>(config: StageConfig) -> Stage<Vec<T>, T> {
    Stage::new(DebatchProcessor::new(), config)
}

/// Spawn a stage delaying each item
pub fn delay<T: Send + 'static>(delay: Duration, config: StageConfig) -> Stage<T, T> {
    Stage::new(DelayProcessor::new(delay), config)
}
