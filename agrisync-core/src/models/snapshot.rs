//! Versioned, ordered view of a resource's records.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::resource::Resource;

/// The reconciled in-memory copy of a resource.
///
/// Records are keyed uniquely by [`Resource::key`] and the version never goes
/// backwards: every fetch or effective change produces version + 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<R> {
    records: Vec<R>,
    version: u64,
    captured_at: DateTime<Utc>,
}

impl<R: Resource> Snapshot<R> {
    /// An empty snapshot at version 0.
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            version: 0,
            captured_at: Utc::now(),
        }
    }

    /// Builds the snapshot that follows `previous` after a full fetch.
    ///
    /// Duplicate keys in `records` keep their first occurrence.
    pub fn fetched(records: Vec<R>, previous: Option<&Snapshot<R>>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| seen.insert(r.key().to_string()))
            .collect();

        Self {
            records,
            version: previous.map_or(1, |p| p.version + 1),
            captured_at: Utc::now(),
        }
    }

    /// The next version of this snapshot holding `records`.
    pub(crate) fn succeed(&self, records: Vec<R>) -> Self {
        Self {
            records,
            version: self.version + 1,
            captured_at: Utc::now(),
        }
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of the record with `key`, if present.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.records.iter().position(|r| r.key() == key)
    }

    /// Record with `key`, if present.
    pub fn get(&self, key: &str) -> Option<&R> {
        self.records.iter().find(|r| r.key() == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.key())
    }
}

impl<R: Resource> Default for Snapshot<R> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Farm;

    #[test]
    fn test_fetched_dedupes_keys() {
        let records = vec![
            Farm::new("f1", "Plot A"),
            Farm::new("f2", "Plot B"),
            Farm::new("f1", "Plot A (dup)"),
        ];
        let snapshot = Snapshot::fetched(records, None);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("f1").unwrap().name, "Plot A");
        assert_eq!(snapshot.version(), 1);
    }

    #[test]
    fn test_fetched_advances_version() {
        let first = Snapshot::fetched(vec![Farm::new("f1", "Plot A")], None);
        let second = Snapshot::fetched(Vec::new(), Some(&first));
        assert_eq!(second.version(), 2);
        assert!(second.is_empty());
    }

    #[test]
    fn test_position_and_keys() {
        let snapshot = Snapshot::fetched(
            vec![Farm::new("f1", "Plot A"), Farm::new("f2", "Plot B")],
            None,
        );
        assert_eq!(snapshot.position("f2"), Some(1));
        assert_eq!(snapshot.position("f3"), None);
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["f1", "f2"]);
    }
}
