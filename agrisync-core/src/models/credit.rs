use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::de::lenient_f64;
use super::resource::{InsertOrder, Resource};

/// Carbon credits accrued by a farm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credit {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub co2_tons: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub greencoins: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource for Credit {
    const TABLE: &'static str = "credits";

    fn key(&self) -> &str {
        &self.id
    }
}

/// A credit issuance or sale recorded against a farm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditTransaction {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub credits_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource for CreditTransaction {
    const TABLE: &'static str = "credit_transactions";
    const ORDER: InsertOrder = InsertOrder::NewestFirst;
    const SORT_COLUMN: Option<&'static str> = Some("transaction_date");

    fn key(&self) -> &str {
        &self.id
    }
}
