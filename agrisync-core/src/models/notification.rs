use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::notice::Notice;
use super::resource::{InsertOrder, Resource};

/// An alert addressed to one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notification {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: String::new(),
            is_read: false,
            user_id: None,
            extra: Map::new(),
        }
    }
}

impl Resource for Notification {
    const TABLE: &'static str = "notifications";
    const ORDER: InsertOrder = InsertOrder::NewestFirst;
    const SORT_COLUMN: Option<&'static str> = Some("created_at");
    const FETCH_LIMIT: Option<usize> = Some(10);
    const FILTERS: &'static [(&'static str, &'static str)] = &[("is_read", "false")];

    fn key(&self) -> &str {
        &self.id
    }

    /// Only unread alerts are surfaced.
    fn notice(&self) -> Option<Notice> {
        if self.is_read {
            return None;
        }
        Some(Notice::info(&self.title).with_description(&self.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_notifications_are_silent() {
        let mut alert = Notification::new("n1", "Frost warning");
        alert.message = "Cover seedlings tonight".to_string();
        assert_eq!(
            alert.notice().unwrap().description.as_deref(),
            Some("Cover seedlings tonight")
        );

        alert.is_read = true;
        assert!(alert.notice().is_none());
    }

    #[test]
    fn test_only_unread_notifications_are_in_view() {
        let mut alert = Notification::new("n1", "Frost warning");
        assert!(alert.in_view());

        alert.is_read = true;
        assert!(!alert.in_view());
    }
}
