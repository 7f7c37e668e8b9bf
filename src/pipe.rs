//! Moving items between units with backpressure.
//!
//! [`pipe`] connects one unit's readable side to another's writable side.
//! [`feed`] and [`drain_into`] adapt the pull-based [`Source`] and the
//! batch-based [`Sink`] collaborators to the same flow control.

use tracing::trace;

use crate::core::{Sink, Source};
use crate::error::{Error, Result};
use crate::stage::{Readable, StageEvent, Writable};

/// Copy every item from `source` into `dest`, then end `dest`.
///
/// When `dest` signals congestion, a [`StageEvent::Pause`] is emitted on the
/// source's unit and reading stops until `dest` drains, followed by a
/// [`StageEvent::Resume`]. Fails with [`Error::Destroyed`] when either side
/// is torn down before the source ends; `dest` is not ended in that case.
pub async fn pipe<T>(mut source: Readable<T>, dest: Writable<T>) -> Result<()> {
    while let Some(item) = source.read().await {
        if !dest.write(item)? {
            trace!(from = %source.control().name(), "destination congested");
            source.control().emit(StageEvent::Pause);
            dest.drain().await;
            if dest.is_destroyed() {
                return Err(Error::Destroyed);
            }
            source.control().emit(StageEvent::Resume);
        }
    }
    if source.control().is_destroyed() {
        return Err(Error::Destroyed);
    }
    dest.end();
    Ok(())
}

/// Push everything `source` produces into `dest`, then end `dest`.
///
/// Demand is sized by the destination's high-water mark. Returns the number
/// of items written.
pub async fn feed<S>(source: &mut S, dest: &Writable<S::Item>) -> Result<usize>
where
    S: Source + ?Sized,
{
    let demand = dest.high_water_mark().max(1);
    let mut written = 0;
    loop {
        let items = source.handle_demand(demand).await?;
        if items.is_empty() {
            break;
        }
        for item in items {
            dest.send(item).await?;
            written += 1;
        }
    }
    dest.end();
    Ok(written)
}

/// Write everything `readable` yields into `sink`, then finish the sink.
///
/// Returns the number of items written.
pub async fn drain_into<S>(mut readable: Readable<S::Item>, sink: &mut S) -> Result<usize>
where
    S: Sink + ?Sized,
{
    let mut written = 0;
    while let Some(item) = readable.read().await {
        sink.write(item).await?;
        written += 1;
    }
    sink.finish().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::{DelayProcessor, MapProcessor};
    use crate::sinks::CollectSink;
    use crate::sources::RangeSource;
    use crate::stage::{EventKind, Stage, StageConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn test_feed_pipe_drain() {
        let mut double = Stage::new(
            MapProcessor::new(|x: i64| x * 2),
            StageConfig::named("double"),
        );
        let mut slow = Stage::new(
            DelayProcessor::new(Duration::from_millis(1)),
            StageConfig::named("slow").high_water_mark(2),
        );

        let link = tokio::spawn(pipe(double.take_readable().unwrap(), slow.writable()));
        let sink = CollectSink::new();
        let out = slow.take_readable().unwrap();
        let collector = {
            let mut sink = sink.clone();
            tokio::spawn(async move { drain_into(out, &mut sink).await })
        };

        let written = feed(&mut RangeSource::new(0..10), &double.writable()).await.unwrap();
        assert_eq!(written, 10);

        link.await.unwrap().unwrap();
        assert_eq!(collector.await.unwrap().unwrap(), 10);
        assert!(sink.is_finished().await);
        let items = sink.take_items().await;
        assert_eq!(items, (0..10).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pipe_pauses_source_on_congestion() {
        let mut fast = Stage::new(MapProcessor::new(|x: u32| x), StageConfig::named("fast"));
        let mut slow = Stage::new(
            DelayProcessor::new(Duration::from_millis(5)),
            StageConfig::named("slow").high_water_mark(1),
        );
        let mut events = fast.subscribe();

        tokio::spawn(pipe(fast.take_readable().unwrap(), slow.writable()));
        for i in 0..3 {
            fast.write(i).unwrap();
        }
        fast.end();

        let out = slow.take_readable().unwrap().collect_all().await;
        assert_eq!(out, vec![0, 1, 2]);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert!(kinds.contains(&EventKind::Pause));
        assert!(kinds.contains(&EventKind::Resume));
    }

    #[tokio::test]
    async fn test_pipe_into_destroyed_stage_fails() {
        let mut source = Stage::new(MapProcessor::new(|x: u32| x), StageConfig::default());
        let dest = Stage::new(MapProcessor::new(|x: u32| x), StageConfig::default());
        dest.destroy(None);

        source.write(1).unwrap();
        source.end();
        let result = pipe(source.take_readable().unwrap(), dest.writable()).await;
        assert!(matches!(result, Err(Error::Destroyed)));
    }
}
