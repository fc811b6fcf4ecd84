use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::notice::Notice;
use super::resource::{InsertOrder, Resource};

/// A field activity (planting, irrigation, harvest...) logged by a farmer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FarmActivity {
    pub id: String,
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FarmActivity {
    pub fn new(id: impl Into<String>, activity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            activity_type: activity_type.into(),
            title: None,
            user_id: None,
            farm_id: None,
            farm_name: None,
            activity_date: None,
            extra: Map::new(),
        }
    }
}

impl Resource for FarmActivity {
    const TABLE: &'static str = "farm_activities";
    const ORDER: InsertOrder = InsertOrder::NewestFirst;
    const SORT_COLUMN: Option<&'static str> = Some("created_at");
    const FETCH_LIMIT: Option<usize> = Some(20);

    fn key(&self) -> &str {
        &self.id
    }

    fn notice(&self) -> Option<Notice> {
        let farm = self.farm_name.as_deref().unwrap_or("your farm");
        Some(
            Notice::info(format!("New activity: {}", self.activity_type))
                .with_description(format!("Recorded for {}", farm)),
        )
    }
}
