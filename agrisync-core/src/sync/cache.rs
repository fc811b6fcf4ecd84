//! Time-bounded cache of fetched snapshots.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{Resource, ResourceKey, Snapshot};

/// How long a cached snapshot is served without refetching.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<R> {
    /// Snapshot stored less than one window ago
    Fresh(Snapshot<R>),
    /// Nothing stored, or the stored snapshot expired; the caller must fetch
    Stale,
}

impl<R> Lookup<R> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Lookup::Fresh(_))
    }

    pub fn fresh(self) -> Option<Snapshot<R>> {
        match self {
            Lookup::Fresh(snapshot) => Some(snapshot),
            Lookup::Stale => None,
        }
    }
}

struct Entry {
    stored_at: Instant,
    snapshot: Box<dyn Any + Send + Sync>,
}

/// Last-fetched snapshot per (resource, scope).
///
/// Entries are only replaced by `put` or dropped by `invalidate`; there is no
/// size bound and no eviction beyond the freshness check on read.
pub struct ViewStateCache {
    window: Duration,
    entries: Mutex<HashMap<ResourceKey, Entry>>,
}

impl ViewStateCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns the cached snapshot if it is younger than the window.
    pub fn get<R: Resource>(&self, key: &ResourceKey) -> Lookup<R> {
        let entries = self.lock();
        let Some(entry) = entries.get(key) else {
            return Lookup::Stale;
        };

        if entry.stored_at.elapsed() >= self.window {
            tracing::debug!(%key, "Cached snapshot expired");
            return Lookup::Stale;
        }

        match entry.snapshot.downcast_ref::<Snapshot<R>>() {
            Some(snapshot) => Lookup::Fresh(snapshot.clone()),
            None => {
                tracing::warn!(%key, "Cached snapshot has a different record type");
                Lookup::Stale
            }
        }
    }

    /// Stores `snapshot`, replacing any previous entry and restarting its window.
    pub fn put<R: Resource>(&self, key: ResourceKey, snapshot: Snapshot<R>) {
        self.lock().insert(
            key,
            Entry {
                stored_at: Instant::now(),
                snapshot: Box::new(snapshot),
            },
        );
    }

    /// Drops the entry so the next `get` reports staleness.
    pub fn invalidate(&self, key: &ResourceKey) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ResourceKey, Entry>> {
        // A poisoned map is still structurally valid
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ViewStateCache {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW)
    }
}

impl std::fmt::Debug for ViewStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewStateCache")
            .field("window", &self.window)
            .field("entries", &self.len())
            .finish()
    }
}
