//! Core traits and types for the sluiceway library.
//!
//! This module contains the collaborator traits every stage is built from,
//! together with the crate error type.

pub mod traits;

// Re-export core items
pub use crate::error::{Error, Result};
pub use traits::{Processor, Sink, Source};
