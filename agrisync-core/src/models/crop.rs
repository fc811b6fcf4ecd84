use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::de::lenient_f64;
use super::notice::Notice;
use super::resource::{InsertOrder, Resource};

/// A crop planted on one farm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Crop {
    pub id: String,
    pub crop_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variety: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub planted_area_hectares: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planting_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Crop {
    pub fn new(id: impl Into<String>, crop_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            crop_type: crop_type.into(),
            farm_id: None,
            variety: None,
            current_stage: None,
            health_status: None,
            planted_area_hectares: None,
            planting_date: None,
            extra: Map::new(),
        }
    }
}

impl Resource for Crop {
    const TABLE: &'static str = "crops";
    const ORDER: InsertOrder = InsertOrder::NewestFirst;
    const SORT_COLUMN: Option<&'static str> = Some("planting_date");

    fn key(&self) -> &str {
        &self.id
    }

    fn notice(&self) -> Option<Notice> {
        Some(Notice::success(format!(
            "New crop \"{}\" added",
            self.crop_type
        )))
    }
}
