//! # Backpressure-aware stream stages for Rust
//!
//! This crate provides composable stream-processing units built on tokio:
//! windows over a stream of events, chains of stages that behave as one,
//! and a router that fans one input out to lazily built per-key pipelines.
//! Flow control is end to end: every unit signals congestion on write and
//! drain once it caught up.
//!
//! ## Core Concepts
//!
//! - **Stage**: a writable side, a readable side and an event channel,
//!   running a **Processor** on its own task
//! - **Accumulator**: sliding or rolling windows by count, numeric field or
//!   custom predicate
//! - **Compose**: two or more stages chained into one
//! - **Demux**: one writable side routed by key to per-key pipelines
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluiceway::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let windows = accumulator(
//!         Strategy::Sliding,
//!         Window::count(3),
//!         StageConfig::named("windows"),
//!     )?;
//!     let mut sizes = Compose::builder(windows)
//!         .then(map(|window: Vec<i64>| window.len(), StageConfig::named("sizes")))
//!         .build()?;
//!
//!     feed(&mut RangeSource::new(0..10), &sizes.writable()).await?;
//!     while let Some(size) = sizes.read().await {
//!         println!("{}", size);
//!     }
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod compose;
pub mod core;
pub mod demux;
pub mod error;
pub mod pipe;
pub mod processors;
pub mod sinks;
pub mod sources;
pub mod stage;

mod fields;
mod telemetry;

// Re-export commonly used items
pub mod prelude {
    pub use crate::accumulator::{accumulator, accumulator_by, Accumulator, Strategy, Window};
    pub use crate::compose::{Compose, ComposeBuilder};
    pub use crate::core::{Processor, Sink, Source};
    pub use crate::demux::{Demux, DemuxBuilder, Keyed, PipelineState, Subscription};
    pub use crate::error::{Error, Result};
    pub use crate::pipe::{drain_into, feed, pipe};
    pub use crate::processors::*;
    pub use crate::sinks::*;
    pub use crate::sources::*;
    pub use crate::stage::{
        Control, EventKind, EventScope, Readable, Stage, StageConfig, StageEvent, Writable,
    };
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
