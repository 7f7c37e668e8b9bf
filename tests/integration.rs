//! Integration tests for windows, compositions and routers

use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_test::{assert_err, assert_ok};

use sluiceway::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Reading {
    sensor: String,
    ts: u64,
    value: f64,
}

fn reading(sensor: &str, ts: u64, value: f64) -> Reading {
    Reading {
        sensor: sensor.to_string(),
        ts,
        value,
    }
}

#[tokio::test]
async fn test_compose_round_trip() -> Result<()> {
    let mut round_trip = Compose::builder(batch::<i64>(4, StageConfig::named("batch")))
        .then(debatch(StageConfig::named("debatch")))
        .build()?;

    let writable = round_trip.writable();
    let writer = tokio::spawn(async move { feed(&mut RangeSource::new(0..50), &writable).await });

    let mut sink = CollectSink::new();
    let written = drain_into(round_trip.take_readable().unwrap(), &mut sink).await?;
    assert_eq!(writer.await.unwrap()?, 50);

    assert_eq!(written, 50);
    assert_eq!(sink.take_items().await, (0..50).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn test_compose_drain_never_fires_with_pending_writes() {
    let mut composed = Compose::builder(map(|x: u32| x, StageConfig::named("fast")))
        .then(delay(
            Duration::from_millis(2),
            StageConfig::named("slow").high_water_mark(2),
        ))
        .high_water_mark(2)
        .build()
        .unwrap();
    let mut events = composed.subscribe();
    let writable = composed.writable();

    let reader = tokio::spawn(composed.take_readable().unwrap().collect_all());

    let mut congested = 0;
    for i in 0..20 {
        if !assert_ok!(composed.write(i)) {
            congested += 1;
            composed.drain().await;
            assert_eq!(writable.writable_length(), 0);
        }
    }
    composed.end();

    assert!(congested > 0);
    assert_eq!(reader.await.unwrap(), (0..20).collect::<Vec<_>>());

    // Every drain observed on the event channel saw an empty queue
    loop {
        match events.recv().await {
            Ok(StageEvent::Drain) => assert_eq!(writable.writable_length(), 0),
            Ok(StageEvent::Close) | Err(RecvError::Closed) => break,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
}

#[tokio::test]
async fn test_compose_backpressure_reaches_the_writer() {
    // Nobody reads the output, so the chain fills up and stalls
    let composed = Compose::builder(map(|x: u32| x, StageConfig::default().high_water_mark(1)))
        .then(map(|x: u32| x, StageConfig::default().high_water_mark(1)))
        .high_water_mark(2)
        .build()
        .unwrap();

    let mut accepted = 0;
    let stalled = tokio::time::timeout(Duration::from_millis(100), async {
        loop {
            composed.send(accepted).await.unwrap();
            accepted += 1;
        }
    })
    .await;

    assert!(stalled.is_err());
    assert!(accepted < 20, "accepted {} items without a reader", accepted);
    composed.destroy(None);
}

#[tokio::test]
async fn test_compose_rejects_single_stage() {
    let result = Compose::from_stages(
        vec![map(|x: u8| x, StageConfig::default())],
        StageConfig::named("lonely"),
    );
    assert!(matches!(assert_err!(result), Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_compose_destroy_tears_down_members() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let composed = Compose::from_stages(
        vec![
            map(|x: u32| x, StageConfig::named("a")),
            delay(Duration::from_secs(60), StageConfig::named("b")),
            map(|x: u32| x, StageConfig::named("c")),
        ],
        StageConfig::named("chain"),
    )
    .unwrap();
    let composed = Compose::builder(composed.into_stage())
        .then(map(|x: u32| x + 1, StageConfig::named("outer")))
        .on_error(move |error| seen.lock().unwrap().push(error.map(|e| e.to_string())))
        .build()
        .unwrap();

    composed.write(1).unwrap();
    composed.destroy(None);
    composed.closed().await;

    for member in composed.members() {
        assert!(member.is_destroyed());
        for inner in member.members() {
            assert!(inner.is_destroyed(), "{} survived", inner.name());
        }
    }
    assert_eq!(*calls.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn test_windows_per_sensor() -> Result<()> {
    let mut demux = Demux::builder(|sensor: &str| {
        let windows = accumulator::<Reading>(
            Strategy::Rolling,
            Window::field("ts", 10.0),
            StageConfig::named(format!("windows-{}", sensor)),
        )
        .expect("valid window");
        Compose::builder(windows)
            .then(map(
                |window: Vec<Reading>| window.iter().map(|r| r.value).sum::<f64>(),
                StageConfig::named(format!("sum-{}", sensor)),
            ))
            .build()
            .expect("two stages")
            .into_stage()
    })
    .key("sensor")
    .build()?;

    let readings = vec![
        reading("a", 0, 1.0),
        reading("b", 1, 10.0),
        reading("a", 4, 2.0),
        reading("a", 12, 3.0),
        reading("b", 15, 20.0),
        reading("a", 13, 4.0),
    ];
    for r in readings {
        demux.send(r).await?;
    }
    demux.end();

    let out = demux.take_output().unwrap().collect_all().await;
    let sums = |key: &str| -> Vec<f64> {
        out.iter()
            .filter(|keyed| keyed.key == key)
            .map(|keyed| keyed.item)
            .collect()
    };
    assert_eq!(sums("a"), vec![3.0, 7.0]);
    assert_eq!(sums("b"), vec![10.0, 20.0]);

    demux.closed().await;
    assert_eq!(demux.keys(), vec!["a", "b"]);
    assert_eq!(demux.state("a"), PipelineState::Finished);
    Ok(())
}

#[tokio::test]
async fn test_demux_constructs_once_per_distinct_key() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = constructed.clone();
    let mut demux = Demux::builder(move |_: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        map(|s: String| s.len(), StageConfig::default())
    })
    .key_by(|s: &String| s.clone())
    .build()
    .unwrap();

    for key in ["a", "b", "a", "c", "a", "b"] {
        demux.send(key.to_string()).await.unwrap();
    }
    demux.end();
    let out = demux.take_output().unwrap().collect_all().await;

    assert_eq!(out.len(), 6);
    assert_eq!(constructed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_demux_errors_are_reemitted_without_callback() {
    let mut demux = Demux::builder(|_: &str| {
        accumulator(
            Strategy::Sliding,
            Window::field("ts", 5.0),
            StageConfig::default(),
        )
        .expect("valid window")
    })
    .key("k")
    .build()
    .unwrap();
    let mut events = match demux.subscribe(EventKind::Error).unwrap() {
        Subscription::Events(events) => events,
        other => panic!("unexpected subscription {:?}", other),
    };

    demux.write(json!({"k": "a", "ts": 1})).unwrap();
    demux.write(json!({"k": "a"})).unwrap();
    demux.end();
    let out = demux.take_output().unwrap().collect_all().await;
    assert_eq!(out.len(), 1);

    loop {
        match events.recv().await.unwrap() {
            StageEvent::Error(error) => {
                assert_eq!(
                    error.to_string(),
                    r#"Key is missing in event: (ts, {"k":"a"})"#
                );
                break;
            }
            StageEvent::Close => panic!("closed without relaying the error"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_pipe_between_units() -> Result<()> {
    let mut windows = accumulator_by(
        Strategy::Rolling,
        |incoming: &i64, oldest: &i64| incoming - oldest >= 5,
        StageConfig::named("by-five"),
    )?;
    let mut sizes = map(|w: Vec<i64>| w.len(), StageConfig::named("sizes"));

    let link = tokio::spawn(pipe(windows.take_readable().unwrap(), sizes.writable()));
    feed(&mut VecSource::new((0..12).collect()), &windows.writable()).await?;

    let out = sizes.take_readable().unwrap().collect_all().await;
    link.await.unwrap()?;
    assert_eq!(out, vec![5, 5, 2]);
    Ok(())
}

#[tokio::test]
async fn test_missing_keys_are_all_reported_before_completion() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let windows = accumulator(
        Strategy::Rolling,
        Window::field("ts", 10.0),
        StageConfig::named("windows").high_water_mark(500),
    )
    .unwrap();
    let mut composed = Compose::builder(windows)
        .then(map(|w: Vec<serde_json::Value>| w.len(), StageConfig::named("sizes")))
        .high_water_mark(500)
        .on_error(move |error| seen.lock().unwrap().push(error.map(|e| e.to_string())))
        .build()
        .unwrap();

    for i in 0..250 {
        composed.write(json!({ "id": i })).unwrap();
    }
    composed.write(json!({ "ts": 1 })).unwrap();
    composed.end();
    let out = composed.take_readable().unwrap().collect_all().await;
    composed.closed().await;

    assert_eq!(out, vec![1]);
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 251);
    assert_eq!(
        calls[0].as_deref(),
        Some(r#"Key is missing in event: (ts, {"id":0})"#)
    );
    assert!(calls[..250].iter().all(Option::is_some));
    assert_eq!(calls.last(), Some(&None));
}
