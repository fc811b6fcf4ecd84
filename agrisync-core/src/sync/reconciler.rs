//! Merges change events into snapshots.

use crate::models::{ChangeEvent, InsertOrder, Resource, Snapshot};

/// What applying an event did to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A new record was placed according to the insert order
    Inserted,
    /// An existing record was replaced in place
    Replaced,
    /// A record was removed
    Removed,
    /// Re-delivery of a record already present with the same value
    Unchanged,
    /// Update or delete for a key the snapshot does not hold
    Conflict,
    /// Record outside the resource's fixed filters, never held
    Excluded,
}

impl Outcome {
    /// True if the snapshot contents changed.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Outcome::Inserted | Outcome::Replaced | Outcome::Removed
        )
    }
}

/// Applies [`ChangeEvent`]s to [`Snapshot`]s.
///
/// Applying is pure: the input snapshot is left untouched and the caller gets
/// the successor. Inserts are deduplicated by key so duplicate delivery from
/// the feed is harmless. Records that stop passing the resource's fixed
/// filters leave the snapshot, and newest-first inserts drop the oldest
/// record once the limit is reached.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    order: InsertOrder,
    limit: Option<usize>,
}

impl Reconciler {
    pub fn new(order: InsertOrder) -> Self {
        Self { order, limit: None }
    }

    /// Caps newest-first snapshots at `limit` records.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Reconciler using the insert order and fetch limit declared by `R`.
    pub fn for_resource<R: Resource>() -> Self {
        Self::new(R::ORDER).with_limit(R::FETCH_LIMIT)
    }

    pub fn order(&self) -> InsertOrder {
        self.order
    }

    /// Applies `event` to `snapshot`, returning the successor and the outcome.
    ///
    /// The version advances only when the records actually change.
    pub fn apply<R: Resource>(
        &self,
        snapshot: &Snapshot<R>,
        event: ChangeEvent<R>,
    ) -> (Snapshot<R>, Outcome) {
        let position = snapshot.position(event.key());

        let excluded = match &event {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => !record.in_view(),
            ChangeEvent::Deleted { .. } => false,
        };
        if excluded {
            return match position {
                Some(idx) => {
                    let mut records = snapshot.records().to_vec();
                    records.remove(idx);
                    (snapshot.succeed(records), Outcome::Removed)
                }
                None => (snapshot.clone(), Outcome::Excluded),
            };
        }

        match (event, position) {
            (ChangeEvent::Inserted(record), None) => {
                let mut records = Vec::with_capacity(snapshot.len() + 1);
                match self.order {
                    InsertOrder::NewestFirst => {
                        records.push(record);
                        records.extend_from_slice(snapshot.records());
                        if let Some(limit) = self.limit {
                            records.truncate(limit.max(1));
                        }
                    }
                    InsertOrder::Append => {
                        records.extend_from_slice(snapshot.records());
                        records.push(record);
                    }
                }
                (snapshot.succeed(records), Outcome::Inserted)
            }
            (ChangeEvent::Inserted(record), Some(idx))
            | (ChangeEvent::Updated(record), Some(idx)) => {
                if snapshot.records()[idx] == record {
                    return (snapshot.clone(), Outcome::Unchanged);
                }
                let mut records = snapshot.records().to_vec();
                records[idx] = record;
                (snapshot.succeed(records), Outcome::Replaced)
            }
            (ChangeEvent::Deleted { .. }, Some(idx)) => {
                let mut records = snapshot.records().to_vec();
                records.remove(idx);
                (snapshot.succeed(records), Outcome::Removed)
            }
            (event @ (ChangeEvent::Updated(_) | ChangeEvent::Deleted { .. }), None) => {
                tracing::warn!(
                    resource = R::TABLE,
                    key = event.key(),
                    kind = event.kind().as_str(),
                    "Change for unknown key ignored"
                );
                (snapshot.clone(), Outcome::Conflict)
            }
        }
    }

    /// Applies a sequence of events in order.
    pub fn apply_all<R: Resource>(
        &self,
        snapshot: &Snapshot<R>,
        events: impl IntoIterator<Item = ChangeEvent<R>>,
    ) -> Snapshot<R> {
        events.into_iter().fold(snapshot.clone(), |current, event| {
            self.apply(&current, event).0
        })
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(InsertOrder::Append)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Farm, FarmActivity, Notification};
    use std::collections::HashMap;

    fn farm_snapshot(farms: &[(&str, &str)]) -> Snapshot<Farm> {
        Snapshot::fetched(
            farms.iter().map(|(id, name)| Farm::new(*id, *name)).collect(),
            None,
        )
    }

    #[test]
    fn test_insert_update_delete_scenario() {
        let reconciler = Reconciler::for_resource::<Farm>();
        let empty = Snapshot::<Farm>::empty();

        let (snapshot, outcome) =
            reconciler.apply(&empty, ChangeEvent::Inserted(Farm::new("f1", "Plot A")));
        assert_eq!(outcome, Outcome::Inserted);
        assert_eq!(snapshot.records(), &[Farm::new("f1", "Plot A")]);

        let (snapshot, outcome) =
            reconciler.apply(&snapshot, ChangeEvent::Updated(Farm::new("f1", "Plot A2")));
        assert_eq!(outcome, Outcome::Replaced);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records()[0].name, "Plot A2");

        let (snapshot, outcome) = reconciler.apply(
            &snapshot,
            ChangeEvent::Deleted {
                key: "f1".to_string(),
            },
        );
        assert_eq!(outcome, Outcome::Removed);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version(), 3);
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let reconciler = Reconciler::default();
        let event = ChangeEvent::Inserted(Farm::new("f1", "Plot A"));

        let once = reconciler.apply_all(&Snapshot::empty(), vec![event.clone()]);
        let twice = reconciler.apply_all(&Snapshot::empty(), vec![event.clone(), event]);

        assert_eq!(once.records(), twice.records());
        assert_eq!(once.version(), twice.version());
    }

    #[test]
    fn test_update_preserves_position() {
        let reconciler = Reconciler::default();
        let snapshot = farm_snapshot(&[("f1", "A"), ("f2", "B"), ("f3", "C")]);

        let (next, _) = reconciler.apply(&snapshot, ChangeEvent::Updated(Farm::new("f2", "B2")));
        assert_eq!(next.keys().collect::<Vec<_>>(), vec!["f1", "f2", "f3"]);
        assert_eq!(next.get("f2").unwrap().name, "B2");
    }

    #[test]
    fn test_insert_order_policies() {
        let snapshot = farm_snapshot(&[("f1", "A")]);

        let (appended, _) = Reconciler::new(InsertOrder::Append)
            .apply(&snapshot, ChangeEvent::Inserted(Farm::new("f2", "B")));
        assert_eq!(appended.keys().collect::<Vec<_>>(), vec!["f1", "f2"]);

        let (prepended, _) = Reconciler::new(InsertOrder::NewestFirst)
            .apply(&snapshot, ChangeEvent::Inserted(Farm::new("f2", "B")));
        assert_eq!(prepended.keys().collect::<Vec<_>>(), vec!["f2", "f1"]);
    }

    #[test]
    fn test_notifications_are_newest_first() {
        let reconciler = Reconciler::for_resource::<Notification>();
        let snapshot = reconciler.apply_all(
            &Snapshot::empty(),
            vec![
                ChangeEvent::Inserted(Notification::new("n1", "first")),
                ChangeEvent::Inserted(Notification::new("n2", "second")),
            ],
        );
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["n2", "n1"]);
    }

    #[test]
    fn test_unknown_key_is_conflict_noop() {
        let reconciler = Reconciler::default();
        let snapshot = farm_snapshot(&[("f1", "A")]);

        let (after_update, outcome) =
            reconciler.apply(&snapshot, ChangeEvent::Updated(Farm::new("f9", "X")));
        assert_eq!(outcome, Outcome::Conflict);
        assert_eq!(after_update, snapshot);

        let (after_delete, outcome) = reconciler.apply(
            &snapshot,
            ChangeEvent::Deleted {
                key: "f9".to_string(),
            },
        );
        assert_eq!(outcome, Outcome::Conflict);
        assert_eq!(after_delete.version(), snapshot.version());
    }

    #[test]
    fn test_sequence_matches_live_key_set() {
        let reconciler = Reconciler::default();
        let events = vec![
            ChangeEvent::Inserted(Farm::new("a", "1")),
            ChangeEvent::Inserted(Farm::new("b", "1")),
            ChangeEvent::Inserted(Farm::new("c", "1")),
            ChangeEvent::Updated(Farm::new("a", "2")),
            ChangeEvent::Deleted {
                key: "b".to_string(),
            },
            ChangeEvent::Updated(Farm::new("c", "2")),
            ChangeEvent::Updated(Farm::new("a", "3")),
            ChangeEvent::Inserted(Farm::new("d", "1")),
            ChangeEvent::Deleted {
                key: "d".to_string(),
            },
        ];

        // Expected: last value per key, minus deleted keys
        let mut expected: HashMap<String, String> = HashMap::new();
        for event in &events {
            match event {
                ChangeEvent::Inserted(f) | ChangeEvent::Updated(f) => {
                    expected.insert(f.id.clone(), f.name.clone());
                }
                ChangeEvent::Deleted { key } => {
                    expected.remove(key);
                }
            }
        }

        let snapshot = reconciler.apply_all(&Snapshot::empty(), events);
        let actual: HashMap<String, String> = snapshot
            .records()
            .iter()
            .map(|f| (f.id.clone(), f.name.clone()))
            .collect();

        assert_eq!(actual, expected);
        assert_eq!(snapshot.len(), expected.len());
    }

    #[test]
    fn test_newest_first_inserts_stay_within_limit() {
        let reconciler = Reconciler::for_resource::<FarmActivity>();
        let limit = FarmActivity::FETCH_LIMIT.unwrap();

        let events = (0..limit + 3)
            .map(|i| ChangeEvent::Inserted(FarmActivity::new(format!("a{}", i), "planting")));
        let snapshot = reconciler.apply_all(&Snapshot::empty(), events);

        assert_eq!(snapshot.len(), limit);
        assert_eq!(snapshot.records()[0].id, format!("a{}", limit + 2));
        assert!(snapshot.get("a0").is_none());
    }

    #[test]
    fn test_append_ignores_limit() {
        let reconciler = Reconciler::new(InsertOrder::Append).with_limit(Some(1));
        let snapshot = reconciler.apply_all(
            &Snapshot::empty(),
            vec![
                ChangeEvent::Inserted(Farm::new("f1", "A")),
                ChangeEvent::Inserted(Farm::new("f2", "B")),
            ],
        );
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_read_notification_leaves_view() {
        let reconciler = Reconciler::for_resource::<Notification>();
        let snapshot = reconciler.apply_all(
            &Snapshot::empty(),
            vec![ChangeEvent::Inserted(Notification::new("n1", "Frost warning"))],
        );

        let mut read = Notification::new("n1", "Frost warning");
        read.is_read = true;
        let (after, outcome) = reconciler.apply(&snapshot, ChangeEvent::Updated(read.clone()));
        assert_eq!(outcome, Outcome::Removed);
        assert!(after.is_empty());

        let mut other = read;
        other.id = "n2".to_string();
        let (unchanged, outcome) = reconciler.apply(&after, ChangeEvent::Inserted(other));
        assert_eq!(outcome, Outcome::Excluded);
        assert_eq!(unchanged.version(), after.version());
    }
}
