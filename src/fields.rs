//! Named-field lookup on serializable items.
//!
//! Windows keyed by a field and routers keyed by a field read the item
//! through its JSON form.

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Look up a top-level field. Missing and `null` fields are a missing-key
/// error carrying the item's JSON text.
pub(crate) fn field<T: Serialize>(item: &T, name: &str) -> Result<Value> {
    let json = serde_json::to_value(item)?;
    match json.get(name) {
        Some(Value::Null) | None => Err(missing(name, &json)),
        Some(value) => Ok(value.clone()),
    }
}

/// Read a numeric field as `f64`.
///
/// A field that is present but not a number is reported as missing.
pub(crate) fn numeric_field<T: Serialize>(item: &T, name: &str) -> Result<f64> {
    let json = serde_json::to_value(item)?;
    json.get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| missing(name, &json))
}

/// Read a field as a routing key: strings verbatim, other values as JSON
/// text.
pub(crate) fn key_field<T: Serialize>(item: &T, name: &str) -> Result<String> {
    Ok(match field(item, name)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn missing(name: &str, json: &Value) -> Error {
    Error::missing_key(name, json.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_field() {
        assert_eq!(numeric_field(&json!({"ts": 3}), "ts").unwrap(), 3.0);
        assert_eq!(numeric_field(&json!({"ts": 1.5}), "ts").unwrap(), 1.5);
    }

    #[test]
    fn test_missing_and_non_numeric_fields() {
        let err = numeric_field(&json!({"ts": 0}), "nonExistingKey").unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Key is missing in event: (nonExistingKey, {"ts":0})"#
        );
        assert!(matches!(
            numeric_field(&json!({"ts": "soon"}), "ts"),
            Err(Error::MissingKey { .. })
        ));
    }

    #[test]
    fn test_key_field() {
        assert_eq!(key_field(&json!({"k": "a"}), "k").unwrap(), "a");
        assert_eq!(key_field(&json!({"k": 7}), "k").unwrap(), "7");
        assert_eq!(key_field(&json!({"k": true}), "k").unwrap(), "true");
        assert!(key_field(&json!({"k": null}), "k").is_err());
        assert!(key_field(&json!(5), "k").is_err());
    }
}
