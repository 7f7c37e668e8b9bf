//! Sliding and rolling windows over a stream of timestamped events.

use serde::Serialize;
use sluiceway::prelude::*;

#[derive(Debug, Clone, Serialize)]
struct Trade {
    ts: u64,
    price: f64,
}

async fn print_windows(label: &str, strategy: Strategy, window: Window<Trade>) -> Result<()> {
    println!("=== {} ===", label);

    let windows = accumulator(strategy, window, StageConfig::named(label))?;
    let mut averages = Compose::builder(windows)
        .then(map(
            |window: Vec<Trade>| {
                let sum: f64 = window.iter().map(|t| t.price).sum();
                (window.len(), sum / window.len() as f64)
            },
            StageConfig::named("average"),
        ))
        .build()?;

    let trades = [(0, 10.0), (2, 11.0), (3, 12.5), (7, 12.0), (8, 9.5), (15, 10.5)]
        .into_iter()
        .map(|(ts, price)| Trade { ts, price })
        .collect();
    let reader = tokio::spawn(averages.take_readable().unwrap().collect_all());
    feed(&mut VecSource::new(trades), &averages.writable()).await?;

    for (size, average) in reader.await.map_err(|e| Error::custom(e.to_string()))? {
        println!("{} trades, average {:.2}", size, average);
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    print_windows("sliding-5s", Strategy::Sliding, Window::field("ts", 5.0)).await?;
    print_windows("rolling-5s", Strategy::Rolling, Window::field("ts", 5.0)).await?;
    print_windows("rolling-3", Strategy::Rolling, Window::count(3)).await?;
    Ok(())
}
