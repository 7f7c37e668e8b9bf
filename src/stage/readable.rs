//! The readable side of a unit.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::debug;

use super::control::Control;
use super::events::StageEvent;
use crate::error::{Error, Result};

/// Handle for reading a unit's output.
///
/// Reading is pull-based: a consumer that stops calling
/// [`read`](Self::read) leaves the bounded channel full, which stalls the
/// producing worker. [`StageEvent::End`] is emitted when the reader observes
/// the end of output.
pub struct Readable<T> {
    inner: mpsc::Receiver<T>,
    control: Control,
    ended: bool,
}

// Fields are never structurally pinned
impl<T> Unpin for Readable<T> {}

/// The worker's end of a [`Readable`].
pub(crate) struct Outbox<T> {
    sender: mpsc::Sender<T>,
    control: Control,
    detached: bool,
}

pub(crate) fn channel<T>(high_water_mark: usize, control: Control) -> (Outbox<T>, Readable<T>) {
    let (sender, receiver) = mpsc::channel(high_water_mark.max(1));
    (
        Outbox {
            sender,
            control: control.clone(),
            detached: false,
        },
        Readable {
            inner: receiver,
            control,
            ended: false,
        },
    )
}

impl<T> Readable<T> {
    /// Read the next output item, or `None` at end of output
    pub async fn read(&mut self) -> Option<T> {
        self.next().await
    }

    /// Read everything until end of output
    pub async fn collect_all(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.read().await {
            items.push(item);
        }
        items
    }

    /// The control of the unit producing this output
    pub fn control(&self) -> &Control {
        &self.control
    }
}

impl<T> Stream for Readable<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.control.is_destroyed() {
            return Poll::Ready(None);
        }
        match this.inner.poll_recv(cx) {
            Poll::Ready(None) => {
                if !this.ended {
                    this.ended = true;
                    this.control.emit(StageEvent::End);
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<T> std::fmt::Debug for Readable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Readable")
            .field("stage", &self.control.name())
            .field("ended", &self.ended)
            .finish()
    }
}

impl<T> Outbox<T> {
    /// Hand an item to the reader, waiting while the channel is full.
    ///
    /// Fails only when the unit is destroyed. Output for a dropped reader is
    /// discarded.
    pub(crate) async fn push(&mut self, item: T) -> Result<()> {
        if self.detached {
            return Ok(());
        }
        if self.sender.capacity() == self.sender.max_capacity() {
            self.control.emit(StageEvent::Readable);
        }
        tokio::select! {
            biased;
            _ = self.control.cancelled() => Err(Error::Destroyed),
            sent = self.sender.send(item) => {
                if sent.is_err() {
                    debug!(stage = %self.control.name(), "reader dropped, discarding output");
                    self.detached = true;
                }
                Ok(())
            }
        }
    }

    pub(crate) async fn push_all(&mut self, items: Vec<T>) -> Result<()> {
        for item in items {
            self.push(item).await?;
        }
        Ok(())
    }
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            control: self.control.clone(),
            detached: self.detached,
        }
    }
}
