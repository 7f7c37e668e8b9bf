//! Routing events to per-user pipelines.

use serde_json::{json, Value};
use sluiceway::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Demux Example ===");

    let mut demux = Demux::builder(|user: &str| {
        println!("constructing pipeline for {}", user);
        accumulator(
            Strategy::Rolling,
            Window::count(2),
            StageConfig::named(format!("pairs-{}", user)),
        )
        .expect("count window is valid")
    })
    .key("user")
    .on_error(|error| {
        if let Some(error) = error {
            println!("pipeline error: {}", error);
        }
    })
    .build()?;

    let events: Vec<Value> = vec![
        json!({"user": "ada", "action": "login"}),
        json!({"user": "bob", "action": "login"}),
        json!({"user": "ada", "action": "search"}),
        json!({"action": "anonymous"}),
        json!({"user": "ada", "action": "logout"}),
        json!({"user": "bob", "action": "logout"}),
    ];
    for event in events {
        demux.send(event).await?;
    }
    demux.end();

    while let Some(Keyed { key, item }) = demux.read().await {
        let actions: Vec<&str> = item.iter().filter_map(|e| e["action"].as_str()).collect();
        println!("{}: {:?}", key, actions);
    }
    demux.closed().await;

    println!("pipelines: {:?}", demux.keys());
    Ok(())
}
