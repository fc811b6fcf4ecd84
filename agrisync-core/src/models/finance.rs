use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::de::lenient_f64;
use super::notice::Notice;
use super::resource::{InsertOrder, Resource};

/// An income or expense entry in a farm's ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialRecord {
    pub id: String,
    pub transaction_type: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FinancialRecord {
    pub fn new(id: impl Into<String>, transaction_type: impl Into<String>, amount: f64) -> Self {
        Self {
            id: id.into(),
            transaction_type: transaction_type.into(),
            amount: Some(amount),
            farm_id: None,
            description: None,
            transaction_date: None,
            extra: Map::new(),
        }
    }

    pub fn is_income(&self) -> bool {
        self.transaction_type == "income"
    }
}

impl Resource for FinancialRecord {
    const TABLE: &'static str = "financial_records";
    const ORDER: InsertOrder = InsertOrder::NewestFirst;
    const SORT_COLUMN: Option<&'static str> = Some("transaction_date");
    const FETCH_LIMIT: Option<usize> = Some(100);

    fn key(&self) -> &str {
        &self.id
    }

    fn notice(&self) -> Option<Notice> {
        let amount = self.amount.unwrap_or_default();
        let description = self
            .description
            .clone()
            .unwrap_or_else(|| "Financial record added".to_string());
        Some(
            Notice::success(format!("New {}: ${}", self.transaction_type, amount))
                .with_description(description),
        )
    }
}

/// Total income across a set of ledger entries.
pub fn total_income(records: &[FinancialRecord]) -> f64 {
    records
        .iter()
        .filter(|r| r.is_income())
        .filter_map(|r| r.amount)
        .sum()
}
