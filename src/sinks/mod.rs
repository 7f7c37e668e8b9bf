//! Sink implementations.
//!
//! Use [`drain_into`](crate::pipe::drain_into) to empty a stage's readable
//! side into a sink.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::core::{Result, Sink};

/// A sink that collects items into a shared vector.
///
/// Clones share the same storage, so a clone kept by the caller sees what
/// the original collected.
pub struct CollectSink<T> {
    items: Arc<TokioMutex<Vec<T>>>,
    finished: Arc<TokioMutex<bool>>,
}

impl<T: Send + 'static> CollectSink<T> {
    /// Create a new collect sink
    pub fn new() -> Self {
        Self {
            items: Arc::new(TokioMutex::new(Vec::new())),
            finished: Arc::new(TokioMutex::new(false)),
        }
    }

    /// Take the collected items
    pub async fn take_items(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock().await)
    }

    /// Number of items collected so far
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Whether nothing was collected
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Whether `finish` was called
    pub async fn is_finished(&self) -> bool {
        *self.finished.lock().await
    }
}

#[async_trait]
impl<T: Send + 'static> Sink for CollectSink<T> {
    type Item = T;

    async fn write_batch(&mut self, items: Vec<Self::Item>) -> Result<()> {
        self.items.lock().await.extend(items);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        *self.finished.lock().await = true;
        Ok(())
    }
}

impl<T: Send + 'static> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            finished: self.finished.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_sink_shares_storage() {
        let mut sink = CollectSink::new();
        let observer = sink.clone();

        sink.write(1).await.unwrap();
        sink.write_batch(vec![2, 3]).await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(observer.len().await, 3);
        assert!(observer.is_finished().await);
        assert_eq!(observer.take_items().await, vec![1, 2, 3]);
        assert!(observer.is_empty().await);
    }
}
