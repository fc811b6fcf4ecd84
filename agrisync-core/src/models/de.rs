//! Serde helpers for columns the backend may send as strings.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accepts `12.5`, `"12.5"` or `null` for an optional numeric column.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected number, got {}",
            other
        ))),
    }
}
