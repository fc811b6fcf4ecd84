//! In-process backend holding tables in memory.
//!
//! Writes are pushed to every open channel whose scope matches the row, the
//! same way the hosted realtime service fans out row changes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{FeedMessage, FeedTransport, FetchRequest, QueryClient};
use crate::error::SyncError;
use crate::models::{record_id, RawChange, ResourceKey};

struct Channel {
    key: ResourceKey,
    tx: mpsc::Sender<FeedMessage>,
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    channels: Mutex<Vec<Channel>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table without notifying channels.
    pub fn seed(&self, resource: &str, rows: Vec<Value>) {
        self.lock_tables()
            .entry(resource.to_string())
            .or_default()
            .extend(rows);
    }

    /// Toggles reachability. While offline, pings, fetches and subscribes fail.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, AtomicOrdering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(AtomicOrdering::SeqCst)
    }

    /// Pushes a change to matching channels without touching the tables.
    pub fn push_change(&self, change: RawChange) {
        let mut channels = self.lock_channels();
        channels.retain(|channel| {
            if channel.key.resource != change.resource {
                return !channel.tx.is_closed();
            }
            if !change.row().is_some_and(|row| channel.key.scope.matches(row)) {
                return !channel.tx.is_closed();
            }
            match channel.tx.try_send(FeedMessage::Change(change.clone())) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(key = %channel.key, "Feed queue full, dropping change");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Drops every open channel, as when the realtime socket goes away.
    pub fn drop_channels(&self, reason: &str) {
        let channels = std::mem::take(&mut *self.lock_channels());
        for channel in channels {
            let _ = channel.tx.try_send(FeedMessage::Dropped(reason.to_string()));
        }
    }

    /// Open channels for `resource`.
    pub fn channel_count(&self, resource: &str) -> usize {
        self.lock_channels()
            .iter()
            .filter(|c| c.key.resource == resource && !c.tx.is_closed())
            .count()
    }

    /// Number of fetch requests served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(AtomicOrdering::SeqCst)
    }

    /// Current rows of a table.
    pub fn rows(&self, resource: &str) -> Vec<Value> {
        self.lock_tables()
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(SyncError::Http("backend unreachable".to_string()))
        }
    }

    fn lock_tables(&self) -> MutexGuard<'_, HashMap<String, Vec<Value>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_channels(&self) -> MutexGuard<'_, Vec<Channel>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_fetch(&self, request: &FetchRequest) -> Result<Vec<Value>, SyncError> {
        self.check_online().map_err(|e| SyncError::FetchFailed {
            resource: request.resource.clone(),
            reason: e.to_string(),
        })?;
        self.fetches.fetch_add(1, AtomicOrdering::SeqCst);

        let mut rows: Vec<Value> = self
            .lock_tables()
            .get(&request.resource)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        request.scope.matches(row)
                            && request.filters.iter().all(|filter| filter.matches(row))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(column) = &request.order_by {
            rows.sort_by(|a, b| compare(b.get(column), a.get(column)));
        }
        if let Some(limit) = request.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn run_insert(&self, resource: &str, row: Value) -> Result<Value, SyncError> {
        self.check_online()?;
        if record_id(&row).is_none() {
            return Err(SyncError::InvalidPayload {
                resource: resource.to_string(),
                reason: "row without id".to_string(),
            });
        }
        self.lock_tables()
            .entry(resource.to_string())
            .or_default()
            .push(row.clone());
        self.push_change(RawChange::insert(resource, row.clone()));
        Ok(row)
    }

    fn run_update(&self, resource: &str, key: &str, patch: Value) -> Result<Value, SyncError> {
        self.check_online()?;
        let (old, new) = {
            let mut tables = self.lock_tables();
            let row = tables
                .get_mut(resource)
                .and_then(|rows| {
                    rows.iter_mut()
                        .find(|r| record_id(r).as_deref() == Some(key))
                })
                .ok_or_else(|| SyncError::ApplyConflict {
                    resource: resource.to_string(),
                    key: key.to_string(),
                })?;
            let old = row.clone();
            if let (Value::Object(target), Value::Object(fields)) = (&mut *row, patch) {
                target.extend(fields);
            }
            (old, row.clone())
        };

        let mut change = RawChange::update(resource, new.clone());
        change.old_record = Some(old);
        self.push_change(change);
        Ok(new)
    }

    fn run_delete(&self, resource: &str, key: &str) -> Result<(), SyncError> {
        self.check_online()?;
        let removed = {
            let mut tables = self.lock_tables();
            let rows = tables.entry(resource.to_string()).or_default();
            let idx = rows
                .iter()
                .position(|r| record_id(r).as_deref() == Some(key))
                .ok_or_else(|| SyncError::ApplyConflict {
                    resource: resource.to_string(),
                    key: key.to_string(),
                })?;
            rows.remove(idx)
        };
        self.push_change(RawChange::delete(resource, removed));
        Ok(())
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

impl QueryClient for MemoryBackend {
    fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<Vec<Value>, SyncError>> {
        Box::pin(async move { self.run_fetch(request) })
    }

    fn insert<'a>(&'a self, resource: &'a str, row: Value) -> BoxFuture<'a, Result<Value, SyncError>> {
        Box::pin(async move { self.run_insert(resource, row) })
    }

    fn update<'a>(
        &'a self,
        resource: &'a str,
        key: &'a str,
        patch: Value,
    ) -> BoxFuture<'a, Result<Value, SyncError>> {
        Box::pin(async move { self.run_update(resource, key, patch) })
    }

    fn delete<'a>(&'a self, resource: &'a str, key: &'a str) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(async move { self.run_delete(resource, key) })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        Box::pin(async move { self.check_online() })
    }
}

impl FeedTransport for MemoryBackend {
    fn open<'a>(
        &'a self,
        key: &'a ResourceKey,
        tx: mpsc::Sender<FeedMessage>,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(async move {
            self.check_online().map_err(|e| SyncError::SubscribeFailed {
                resource: key.resource.clone(),
                reason: e.to_string(),
            })?;
            self.lock_channels().push(Channel {
                key: key.clone(),
                tx,
            });
            Ok(())
        })
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("online", &self.is_online())
            .field("channels", &self.lock_channels().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Notification, Scope};
    use serde_json::json;

    fn request(scope: Scope) -> FetchRequest {
        FetchRequest {
            resource: "farm_activities".to_string(),
            scope,
            filters: Vec::new(),
            order_by: Some("created_at".to_string()),
            limit: Some(2),
        }
    }

    #[tokio::test]
    async fn test_fetch_filters_sorts_and_limits() {
        let backend = MemoryBackend::new();
        backend.seed(
            "farm_activities",
            vec![
                json!({"id": "a1", "user_id": "U1", "created_at": "2024-03-01T00:00:00Z"}),
                json!({"id": "a2", "user_id": "U1", "created_at": "2024-03-03T00:00:00Z"}),
                json!({"id": "a3", "user_id": "U2", "created_at": "2024-03-04T00:00:00Z"}),
                json!({"id": "a4", "user_id": "U1", "created_at": "2024-03-02T00:00:00Z"}),
            ],
        );

        let rows = backend.fetch(&request(Scope::user("U1"))).await.unwrap();
        let ids: Vec<_> = rows.iter().filter_map(record_id).collect();
        assert_eq!(ids, vec!["a2", "a4"]);
        assert_eq!(backend.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_applies_fixed_filters() {
        let backend = MemoryBackend::new();
        backend.seed(
            "notifications",
            vec![
                json!({"id": "n1", "user_id": "U1", "title": "Unread", "is_read": false}),
                json!({"id": "n2", "user_id": "U1", "title": "Read", "is_read": true}),
            ],
        );

        let request = FetchRequest::for_resource::<Notification>(Scope::user("U1"));
        let rows = backend.fetch(&request).await.unwrap();
        let ids: Vec<_> = rows.iter().filter_map(record_id).collect();
        assert_eq!(ids, vec!["n1"]);
    }

    #[tokio::test]
    async fn test_offline_fails_fetch_and_ping() {
        let backend = MemoryBackend::new();
        backend.set_online(false);

        let err = backend.fetch(&request(Scope::user("U1"))).await.unwrap_err();
        assert!(matches!(err, SyncError::FetchFailed { .. }));
        assert!(backend.ping().await.is_err());

        backend.set_online(true);
        assert!(backend.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_writes_fan_out_to_matching_channels() {
        let backend = MemoryBackend::new();
        let key = ResourceKey::new("farms", Scope::owner("U1"));
        let (tx, mut rx) = mpsc::channel(8);
        backend.open(&key, tx).await.unwrap();

        backend
            .insert("farms", json!({"id": "f9", "owner_id": "U2", "name": "Theirs"}))
            .await
            .unwrap();
        backend
            .insert("farms", json!({"id": "f1", "owner_id": "U1", "name": "Plot A"}))
            .await
            .unwrap();
        backend
            .update("farms", "f1", json!({"name": "Plot A2"}))
            .await
            .unwrap();
        backend.delete("farms", "f1").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(FeedMessage::Change(change)) = rx.try_recv() {
            assert_eq!(change.row().and_then(record_id).as_deref(), Some("f1"));
            kinds.push(change.kind.as_str());
        }
        assert_eq!(kinds, vec!["INSERT", "UPDATE", "DELETE"]);
        assert_eq!(backend.rows("farms").len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_key_conflicts() {
        let backend = MemoryBackend::new();
        let err = backend
            .update("farms", "missing", json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ApplyConflict { .. }));
    }
}
