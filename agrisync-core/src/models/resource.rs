//! Resource identity: which table, filtered to which owner.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::notice::Notice;

/// Where a newly inserted record lands in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOrder {
    /// Prepend; used by activity, notification and ledger feeds
    NewestFirst,
    /// Append in delivery order
    Append,
}

/// A typed record schema backed by one table of the backend.
///
/// Raw feed and query payloads are deserialized into the implementing type,
/// so a payload that does not match the schema is rejected at the boundary
/// instead of flowing into view state.
pub trait Resource:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Backend table name
    const TABLE: &'static str;
    /// Placement policy for inserted records
    const ORDER: InsertOrder = InsertOrder::Append;
    /// Column the initial fetch sorts by, descending
    const SORT_COLUMN: Option<&'static str> = None;
    /// Row limit for the initial fetch; live inserts keep the view within it
    const FETCH_LIMIT: Option<usize> = None;
    /// Fixed equality filters applied on top of the owner scope
    const FILTERS: &'static [(&'static str, &'static str)] = &[];

    /// Primary identifier of this record.
    fn key(&self) -> &str;

    /// Returns true if this record passes [`Resource::FILTERS`].
    fn in_view(&self) -> bool {
        if Self::FILTERS.is_empty() {
            return true;
        }
        let Ok(row) = serde_json::to_value(self) else {
            return false;
        };
        Self::FILTERS
            .iter()
            .all(|(column, value)| Scope::new(*column, *value).matches(&row))
    }

    /// User-facing notice raised when this record is inserted.
    fn notice(&self) -> Option<Notice> {
        None
    }
}

/// Equality filter restricting a resource to one owner, e.g. `owner_id=eq.U1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub column: String,
    pub value: String,
}

impl Scope {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Scope on the `owner_id` column.
    pub fn owner(value: impl Into<String>) -> Self {
        Self::new("owner_id", value)
    }

    /// Scope on the `user_id` column.
    pub fn user(value: impl Into<String>) -> Self {
        Self::new("user_id", value)
    }

    /// Scope on the `farm_id` column.
    pub fn farm(value: impl Into<String>) -> Self {
        Self::new("farm_id", value)
    }

    /// Filter expression understood by the backend (`column=eq.value`).
    pub fn filter(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }

    /// Returns true if a raw record belongs to this scope.
    pub fn matches(&self, record: &Value) -> bool {
        match record.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.filter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid scope '{0}', expected column=value or column=eq.value")]
pub struct ParseScopeError(String);

impl FromStr for Scope {
    type Err = ParseScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, value) = s
            .split_once('=')
            .ok_or_else(|| ParseScopeError(s.to_string()))?;
        let column = column.trim();
        let value = value.trim();
        let value = value.strip_prefix("eq.").unwrap_or(value);

        if column.is_empty() || value.is_empty() {
            return Err(ParseScopeError(s.to_string()));
        }

        Ok(Scope::new(column, value))
    }
}

/// Identity of a watched resource: table plus owner scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub resource: String,
    pub scope: Scope,
}

impl ResourceKey {
    pub fn new(resource: impl Into<String>, scope: Scope) -> Self {
        Self {
            resource: resource.into(),
            scope,
        }
    }

    /// Key for the table backing `R`.
    pub fn of<R: Resource>(scope: Scope) -> Self {
        Self::new(R::TABLE, scope)
    }

    /// Channel topic used by the realtime feed.
    pub fn topic(&self) -> String {
        format!("realtime:public:{}:{}", self.resource, self.scope.filter())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.resource, self.scope)
    }
}
