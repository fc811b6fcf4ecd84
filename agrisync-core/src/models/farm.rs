use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::de::lenient_f64;
use super::notice::Notice;
use super::resource::{InsertOrder, Resource};

/// A land parcel owned by a farmer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Farm {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub size_hectares: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Columns without a typed field
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Farm {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner_id: None,
            location: None,
            status: None,
            size_hectares: None,
            created_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.as_deref() == Some("active")
    }
}

impl Resource for Farm {
    const TABLE: &'static str = "farms";
    const ORDER: InsertOrder = InsertOrder::NewestFirst;
    const SORT_COLUMN: Option<&'static str> = Some("created_at");

    fn key(&self) -> &str {
        &self.id
    }

    fn notice(&self) -> Option<Notice> {
        Some(Notice::success(format!("New farm \"{}\" added", self.name)))
    }
}

impl fmt::Display for Farm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(size) = self.size_hectares {
            write!(f, " - {} ha", size)?;
        }
        if let Some(location) = &self.location {
            write!(f, " ({})", location)?;
        }
        if let Some(status) = &self.status {
            write!(f, " [{}]", status)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_minimal() {
        let farm: Farm = serde_json::from_value(json!({"id": "f1", "name": "Plot A"})).unwrap();
        assert_eq!(farm, Farm::new("f1", "Plot A"));
    }

    #[test]
    fn test_keeps_unknown_columns() {
        let farm: Farm = serde_json::from_value(json!({
            "id": "f1",
            "name": "Plot A",
            "size_hectares": "2.5",
            "soil_type": "loam"
        }))
        .unwrap();
        assert_eq!(farm.size_hectares, Some(2.5));
        assert_eq!(farm.extra.get("soil_type"), Some(&json!("loam")));
    }

    #[test]
    fn test_display() {
        let mut farm = Farm::new("f1", "Plot A").with_status("active");
        farm.size_hectares = Some(3.0);
        assert_eq!(farm.to_string(), "Plot A - 3 ha [active]");
        assert!(farm.is_active());
    }
}
