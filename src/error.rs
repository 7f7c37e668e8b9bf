//! Error types for stages, compositions and routers.

use std::sync::Arc;

/// The main error type for the stage system.
///
/// Errors are `Clone` so they can travel over a stage's event channel to
/// every subscriber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A processor failed to transform an item
    #[error("Processor error: {0}")]
    Processor(Arc<dyn std::error::Error + Send + Sync>),

    /// A required construction argument was missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An event did not carry the field a window or router is keyed by
    #[error("Key is missing in event: ({key}, {event})")]
    MissingKey { key: String, event: String },

    /// A write arrived after `end()` was called
    #[error("Write after end")]
    WriteAfterEnd,

    /// The stage was destroyed
    #[error("Stage was destroyed")]
    Destroyed,

    /// The event cannot be subscribed to on this unit
    #[error("Cannot subscribe to `{0}` here; select a per-key pipeline first")]
    UnsupportedEvent(String),

    /// An item could not be serialized for field lookup
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a processor error from any error type
    pub fn processor<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Processor(Arc::new(error))
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Create a missing key error for `key`, rendering the offending event
    pub fn missing_key<S: Into<String>>(key: S, event: String) -> Self {
        Error::MissingKey {
            key: key.into(),
            event,
        }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Whether this error only reports teardown of the unit itself
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Error::Destroyed)
    }
}

// Common conversions
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Custom(e.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_message() {
        let err = Error::missing_key("nonExistingKey", r#"{"ts":0}"#.to_string());
        assert_eq!(
            err.to_string(),
            r#"Key is missing in event: (nonExistingKey, {"ts":0})"#
        );
    }
}
