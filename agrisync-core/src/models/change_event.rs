//! Change events delivered by the feed.
//!
//! The feed hands over loosely shaped [`RawChange`] payloads; they are turned
//! into a typed [`ChangeEvent`] for one resource schema before anything else
//! sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resource::Resource;
use crate::error::SyncError;

/// Kind of change reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// Untyped change payload as it arrives from a feed transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "table")]
    pub resource: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl RawChange {
    pub fn insert(resource: impl Into<String>, record: Value) -> Self {
        Self {
            resource: resource.into(),
            kind: ChangeKind::Insert,
            record: Some(record),
            old_record: None,
            commit_timestamp: None,
        }
    }

    pub fn update(resource: impl Into<String>, record: Value) -> Self {
        Self {
            resource: resource.into(),
            kind: ChangeKind::Update,
            record: Some(record),
            old_record: None,
            commit_timestamp: None,
        }
    }

    pub fn delete(resource: impl Into<String>, old_record: Value) -> Self {
        Self {
            resource: resource.into(),
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(old_record),
            commit_timestamp: None,
        }
    }

    /// The row this change concerns: the new row, or the old one for deletes.
    pub fn row(&self) -> Option<&Value> {
        self.record.as_ref().or(self.old_record.as_ref())
    }
}

/// A validated change to one record of resource `R`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R> {
    Inserted(R),
    Updated(R),
    Deleted { key: String },
}

impl<R: Resource> ChangeEvent<R> {
    /// Key of the affected record.
    pub fn key(&self) -> &str {
        match self {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => record.key(),
            ChangeEvent::Deleted { key } => key,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Inserted(_) => ChangeKind::Insert,
            ChangeEvent::Updated(_) => ChangeKind::Update,
            ChangeEvent::Deleted { .. } => ChangeKind::Delete,
        }
    }

    /// Validates a raw payload against the schema of `R`.
    pub fn from_raw(raw: RawChange) -> Result<Self, SyncError> {
        let invalid = |reason: String| SyncError::InvalidPayload {
            resource: R::TABLE.to_string(),
            reason,
        };

        if raw.resource != R::TABLE {
            return Err(invalid(format!(
                "change for '{}' delivered to '{}' feed",
                raw.resource,
                R::TABLE
            )));
        }

        match raw.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let value = raw
                    .record
                    .ok_or_else(|| invalid(format!("{} without record", raw.kind.as_str())))?;
                let record: R =
                    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
                if raw.kind == ChangeKind::Insert {
                    Ok(ChangeEvent::Inserted(record))
                } else {
                    Ok(ChangeEvent::Updated(record))
                }
            }
            ChangeKind::Delete => {
                let key = raw
                    .old_record
                    .as_ref()
                    .or(raw.record.as_ref())
                    .and_then(record_id)
                    .ok_or_else(|| invalid("DELETE without record id".to_string()))?;
                Ok(ChangeEvent::Deleted { key })
            }
        }
    }
}

/// Reads the `id` column of a raw row as a string key.
pub fn record_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Farm;
    use serde_json::json;

    #[test]
    fn test_insert_from_raw() {
        let raw = RawChange::insert(
            "farms",
            json!({"id": "f1", "owner_id": "U1", "name": "Plot A"}),
        );
        let event = ChangeEvent::<Farm>::from_raw(raw).unwrap();
        assert_eq!(event.kind(), ChangeKind::Insert);
        assert_eq!(event.key(), "f1");
        match event {
            ChangeEvent::Inserted(farm) => assert_eq!(farm.name, "Plot A"),
            _ => panic!("Expected Inserted"),
        }
    }

    #[test]
    fn test_delete_uses_old_record_id() {
        let raw = RawChange::delete("farms", json!({"id": "f1"}));
        let event = ChangeEvent::<Farm>::from_raw(raw).unwrap();
        assert_eq!(
            event,
            ChangeEvent::Deleted {
                key: "f1".to_string()
            }
        );
    }

    #[test]
    fn test_numeric_id() {
        assert_eq!(record_id(&json!({"id": 17})), Some("17".to_string()));
        assert_eq!(record_id(&json!({"name": "x"})), None);
    }

    #[test]
    fn test_rejects_schema_mismatch() {
        let raw = RawChange::insert("farms", json!({"id": "f1", "name": 12}));
        let err = ChangeEvent::<Farm>::from_raw(raw).unwrap_err();
        assert!(matches!(err, SyncError::InvalidPayload { .. }));
    }

    #[test]
    fn test_rejects_wrong_table() {
        let raw = RawChange::insert("crops", json!({"id": "c1", "name": "maize"}));
        assert!(ChangeEvent::<Farm>::from_raw(raw).is_err());
    }

    #[test]
    fn test_raw_change_wire_names() {
        let raw: RawChange = serde_json::from_value(json!({
            "table": "farms",
            "type": "UPDATE",
            "record": {"id": "f1", "name": "Plot A2"},
            "old_record": {"id": "f1"},
            "commit_timestamp": "2025-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(raw.kind, ChangeKind::Update);
        assert_eq!(raw.resource, "farms");
        assert!(raw.commit_timestamp.is_some());
    }
}
