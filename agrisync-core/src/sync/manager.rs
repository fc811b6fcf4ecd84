//! Shared live views keyed by (resource, scope).
//!
//! A live view is one tokio task owning the reconciled snapshot of a resource.
//! It subscribes to the feed, loads the initial snapshot through the cache,
//! folds every change into the snapshot and publishes each version on a
//! `watch` channel. Consumers hold [`ViewHandle`]s; the view is torn down when
//! the last handle is dropped.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

use super::cache::{Lookup, ViewStateCache};
use super::event_log::{EventLog, LogEntry, LogKind};
use super::feed::ChangeFeedClient;
use super::monitor::{ConnectionMonitor, ConnectionState, LostSignal, MonitorSettings};
use super::reconciler::{Outcome, Reconciler};
use super::settings::SyncSettings;
use crate::backend::{FeedTransport, FetchRequest, QueryClient};
use crate::error::SyncError;
use crate::models::{ChangeEvent, Notice, Resource, ResourceKey, Scope, Snapshot};

const NOTICE_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 8;

type SlotKey = (ResourceKey, TypeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewCommand {
    Refresh,
}

struct Shared<R> {
    snapshot: watch::Receiver<Snapshot<R>>,
    commands: mpsc::Sender<ViewCommand>,
}

impl<R> Clone for Shared<R> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
            commands: self.commands.clone(),
        }
    }
}

struct ViewSlot {
    refs: usize,
    shared: Box<dyn Any + Send + Sync>,
    task: JoinHandle<()>,
}

struct Inner {
    feed: ChangeFeedClient,
    query: Arc<dyn QueryClient>,
    cache: Arc<ViewStateCache>,
    settings: SyncSettings,
    monitor: Mutex<Option<ConnectionMonitor>>,
    connection: watch::Receiver<ConnectionState>,
    lost: LostSignal,
    notices: broadcast::Sender<Notice>,
    log: Arc<EventLog>,
    views: Mutex<HashMap<SlotKey, ViewSlot>>,
    logger: JoinHandle<()>,
}

impl Inner {
    fn lock_views(&self) -> MutexGuard<'_, HashMap<SlotKey, ViewSlot>> {
        self.views.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn retain(&self, slot_key: &SlotKey) {
        if let Some(slot) = self.lock_views().get_mut(slot_key) {
            slot.refs += 1;
        }
    }

    fn release(&self, slot_key: &SlotKey) {
        let mut views = self.lock_views();
        let Some(slot) = views.get_mut(slot_key) else {
            return;
        };
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            if let Some(slot) = views.remove(slot_key) {
                slot.task.abort();
                tracing::debug!(key = %slot_key.0, "Live view torn down");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, slot) in self.lock_views().drain() {
            slot.task.abort();
        }
        self.logger.abort();
    }
}

/// One sync service shared by every consumer.
///
/// Owns the connection monitor, the feed client, the view cache and the
/// registry of live views. Cloning is cheap and yields a handle to the same
/// service. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Starts the connection monitor and returns a manager with no live views.
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        query: Arc<dyn QueryClient>,
        settings: SyncSettings,
    ) -> Self {
        let ping_client = query.clone();
        let monitor = ConnectionMonitor::start(
            move || {
                let client = ping_client.clone();
                async move { client.ping().await }
            },
            MonitorSettings::from(&settings),
        );

        let lost = monitor.lost_signal();
        let feed = ChangeFeedClient::new(transport, lost.clone(), settings.event_queue_capacity);
        let cache = Arc::new(ViewStateCache::new(settings.freshness_window));
        let log = Arc::new(EventLog::new(settings.event_log_capacity));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let connection = monitor.subscribe();

        let mut states = monitor.subscribe();
        let state_log = log.clone();
        let logger = tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                state_log.record(None, LogKind::Connection(state));
            }
        });

        Self {
            inner: Arc::new(Inner {
                feed,
                query,
                cache,
                settings,
                monitor: Mutex::new(Some(monitor)),
                connection,
                lost,
                notices,
                log,
                views: Mutex::new(HashMap::new()),
                logger,
            }),
        }
    }

    /// Returns the live view of `R` within `scope`, starting it if needed.
    pub fn view<R: Resource>(&self, scope: Scope) -> ViewHandle<R> {
        let key = ResourceKey::of::<R>(scope);
        let slot_key = (key.clone(), TypeId::of::<R>());
        let mut views = self.inner.lock_views();

        if let Some(slot) = views.get_mut(&slot_key) {
            if let Some(shared) = slot.shared.downcast_ref::<Shared<R>>() {
                slot.refs += 1;
                tracing::debug!(%key, refs = slot.refs, "Joined live view");
                return ViewHandle {
                    slot: slot_key,
                    shared: shared.clone(),
                    inner: self.inner.clone(),
                };
            }
        }

        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::<R>::empty());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let shared = Shared {
            snapshot: snapshot_rx,
            commands: command_tx,
        };

        let view = LiveView {
            key: key.clone(),
            feed: self.inner.feed.clone(),
            query: self.inner.query.clone(),
            cache: self.inner.cache.clone(),
            settings: self.inner.settings.clone(),
            connection: self.inner.connection.clone(),
            lost: self.inner.lost.clone(),
            notices: self.inner.notices.clone(),
            log: self.inner.log.clone(),
            reconciler: Reconciler::for_resource::<R>(),
            snapshot_tx,
            current: Snapshot::empty(),
        };
        let task = tokio::spawn(view.run(command_rx));
        tracing::debug!(%key, "Started live view");

        views.insert(
            slot_key.clone(),
            ViewSlot {
                refs: 1,
                shared: Box::new(shared.clone()),
                task,
            },
        );

        ViewHandle {
            slot: slot_key,
            shared,
            inner: self.inner.clone(),
        }
    }

    /// One-off read through the cache, without subscribing.
    pub async fn fetch<R: Resource>(&self, scope: Scope, force: bool) -> Result<Snapshot<R>, SyncError> {
        let key = ResourceKey::of::<R>(scope);
        if force {
            self.inner.cache.invalidate(&key);
        }
        if let Lookup::Fresh(snapshot) = self.inner.cache.get::<R>(&key) {
            tracing::debug!(%key, "Served from cache");
            return Ok(snapshot);
        }

        let records = fetch_records::<R>(self.inner.query.as_ref(), &key.scope).await?;
        let snapshot = Snapshot::fetched(records, None);
        self.inner
            .log
            .record(Some(&key), LogKind::Fetched { records: snapshot.len() });
        self.inner.cache.put(key, snapshot.clone());
        Ok(snapshot)
    }

    /// Inserts a record, returning it as stored. Live views learn about it
    /// from the feed.
    pub async fn insert<R: Resource>(&self, record: &R) -> Result<R, SyncError> {
        let row = to_row(record)?;
        let stored = self.inner.query.insert(R::TABLE, row).await?;
        from_row(stored)
    }

    /// Writes every field of `record` to the row with the same key.
    pub async fn update<R: Resource>(&self, record: &R) -> Result<R, SyncError> {
        let row = to_row(record)?;
        let stored = self.inner.query.update(R::TABLE, record.key(), row).await?;
        from_row(stored)
    }

    pub async fn delete<R: Resource>(&self, key: &str) -> Result<(), SyncError> {
        self.inner.query.delete(R::TABLE, key).await
    }

    /// Receiver of connection state transitions.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.connection.borrow()
    }

    /// Receiver of notices raised by inserted records.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Recent feed, fetch and connection events, newest first.
    pub fn recent_events(&self) -> Vec<LogEntry> {
        self.inner.log.recent()
    }

    pub fn cache(&self) -> &ViewStateCache {
        &self.inner.cache
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Number of live views.
    pub fn active_views(&self) -> usize {
        self.inner.lock_views().len()
    }

    /// Handles held on the live view of `R` within `scope`.
    pub fn ref_count<R: Resource>(&self, scope: Scope) -> usize {
        let slot_key = (ResourceKey::of::<R>(scope), TypeId::of::<R>());
        self.inner
            .lock_views()
            .get(&slot_key)
            .map_or(0, |slot| slot.refs)
    }

    /// Stops the monitor and every live view. Outstanding handles keep their
    /// last snapshot.
    pub async fn shutdown(&self) {
        let monitor = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        let views: Vec<ViewSlot> = self.inner.lock_views().drain().map(|(_, slot)| slot).collect();
        for slot in views {
            slot.task.abort();
        }
        tracing::info!("Sync manager shut down");
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("state", &self.state())
            .field("active_views", &self.active_views())
            .finish()
    }
}

/// A consumer's reference to a live view.
pub struct ViewHandle<R: Resource> {
    slot: SlotKey,
    shared: Shared<R>,
    inner: Arc<Inner>,
}

impl<R: Resource> ViewHandle<R> {
    pub fn key(&self) -> &ResourceKey {
        &self.slot.0
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Snapshot<R> {
        self.shared.snapshot.borrow().clone()
    }

    /// Waits for the next published snapshot. `None` if the view stopped.
    pub async fn changed(&mut self) -> Option<Snapshot<R>> {
        self.shared.snapshot.changed().await.ok()?;
        Some(self.shared.snapshot.borrow_and_update().clone())
    }

    /// Waits until a snapshot satisfies `f`, checking the current one first.
    pub async fn wait_for(&mut self, f: impl FnMut(&Snapshot<R>) -> bool) -> Option<Snapshot<R>> {
        self.shared
            .snapshot
            .wait_for(f)
            .await
            .ok()
            .map(|snapshot| snapshot.clone())
    }

    /// Forces a refetch that bypasses the cache.
    pub async fn refresh(&self) {
        let _ = self.shared.commands.send(ViewCommand::Refresh).await;
    }

    /// A standalone receiver of snapshots.
    pub fn receiver(&self) -> watch::Receiver<Snapshot<R>> {
        self.shared.snapshot.clone()
    }
}

impl<R: Resource> Clone for ViewHandle<R> {
    fn clone(&self) -> Self {
        self.inner.retain(&self.slot);
        Self {
            slot: self.slot.clone(),
            shared: self.shared.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<R: Resource> Drop for ViewHandle<R> {
    fn drop(&mut self) {
        self.inner.release(&self.slot);
    }
}

impl<R: Resource> std::fmt::Debug for ViewHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHandle")
            .field("key", &self.slot.0)
            .field("version", &self.shared.snapshot.borrow().version())
            .finish()
    }
}

/// The task behind a live view.
struct LiveView<R: Resource> {
    key: ResourceKey,
    feed: ChangeFeedClient,
    query: Arc<dyn QueryClient>,
    cache: Arc<ViewStateCache>,
    settings: SyncSettings,
    connection: watch::Receiver<ConnectionState>,
    lost: LostSignal,
    notices: broadcast::Sender<Notice>,
    log: Arc<EventLog>,
    reconciler: Reconciler,
    snapshot_tx: watch::Sender<Snapshot<R>>,
    current: Snapshot<R>,
}

impl<R: Resource> LiveView<R> {
    async fn run(mut self, mut commands: mpsc::Receiver<ViewCommand>) {
        let mut force = false;
        let mut state = *self.connection.borrow_and_update();
        let mut resubscribe = self.settings.monitor_backoff();

        loop {
            // Subscribe before loading so no change falls between the two
            let mut subscription = self.feed.subscribe::<R>(self.key.scope.clone()).await;
            if !subscription.opened() {
                // Serve what the cache or a plain fetch has; the forced
                // refetch waits until a channel is actually open
                self.load(false).await;
                force = true;

                let delay = resubscribe.next_delay();
                state = self.await_reconnect().await;
                tracing::debug!(
                    key = %self.key,
                    attempt = resubscribe.attempt(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Channel refused, resubscribing after backoff"
                );
                self.pause(delay, &mut commands).await;
                continue;
            }
            resubscribe.reset();
            self.load(force).await;
            force = true;

            let mut next_refresh = Instant::now() + self.settings.refresh_interval_for(state);
            loop {
                tokio::select! {
                    event = subscription.next() => match event {
                        Some(event) => self.apply(event),
                        None => {
                            state = self.await_reconnect().await;
                            break;
                        }
                    },
                    next = next_state(&mut self.connection) => {
                        let restored = next.is_connected() && !state.is_connected();
                        state = next;
                        if restored {
                            tracing::info!(key = %self.key, "Connection restored, resyncing");
                            break;
                        }
                        next_refresh = Instant::now() + self.settings.refresh_interval_for(state);
                    }
                    Some(command) = commands.recv() => match command {
                        ViewCommand::Refresh => {
                            self.load(true).await;
                            next_refresh = Instant::now() + self.settings.refresh_interval_for(state);
                        }
                    },
                    _ = sleep_until(next_refresh) => {
                        self.load(false).await;
                        next_refresh = Instant::now() + self.settings.refresh_interval_for(state);
                    }
                }
            }
        }
    }

    /// Waits out a dropped feed until the monitor reports the connection
    /// back, refreshing on the degraded schedule meanwhile.
    async fn await_reconnect(&mut self) -> ConnectionState {
        let mut state = *self.connection.borrow_and_update();
        let mut failed = !state.is_connected();

        loop {
            let wait = self.settings.refresh_interval_for(state);
            tokio::select! {
                next = next_state(&mut self.connection) => {
                    state = next;
                    if !state.is_connected() {
                        failed = true;
                    } else if failed {
                        return state;
                    }
                }
                _ = sleep(wait) => {
                    self.load(false).await;
                    if state == ConnectionState::Disconnected {
                        // The monitor gave up; retry the feed on the slow schedule
                        return state;
                    }
                }
            }
        }
    }

    /// Sleeps for `delay` while still serving refresh commands.
    async fn pause(&mut self, delay: Duration, commands: &mut mpsc::Receiver<ViewCommand>) {
        let until = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(until) => return,
                Some(command) = commands.recv() => match command {
                    ViewCommand::Refresh => self.load(true).await,
                },
            }
        }
    }

    /// Loads a snapshot through the cache. A failed fetch is reported to the
    /// monitor and leaves the current snapshot in place.
    async fn load(&mut self, force: bool) {
        if force {
            self.cache.invalidate(&self.key);
        }

        if let Lookup::Fresh(cached) = self.cache.get::<R>(&self.key) {
            if cached.records() != self.current.records() {
                let next = Snapshot::fetched(cached.records().to_vec(), Some(&self.current));
                self.publish(next);
            }
            return;
        }

        match fetch_records::<R>(self.query.as_ref(), &self.key.scope).await {
            Ok(records) => {
                let next = Snapshot::fetched(records, Some(&self.current));
                tracing::debug!(key = %self.key, records = next.len(), version = next.version(), "Fetched");
                self.log
                    .record(Some(&self.key), LogKind::Fetched { records: next.len() });
                self.cache.put(self.key.clone(), next.clone());
                self.publish(next);
            }
            Err(e) => {
                tracing::warn!(key = %self.key, "Refresh failed: {}", e);
                self.lost.report(e.to_string());
            }
        }
    }

    fn apply(&mut self, event: ChangeEvent<R>) {
        let notice = match &event {
            ChangeEvent::Inserted(record) => record.notice(),
            _ => None,
        };
        let kind = event.kind();
        let record_key = event.key().to_string();

        let (next, outcome) = self.reconciler.apply(&self.current, event);
        self.log.record(
            Some(&self.key),
            LogKind::Change {
                kind,
                key: record_key,
            },
        );

        if outcome == Outcome::Inserted {
            if let Some(notice) = notice {
                let _ = self.notices.send(notice);
            }
        }
        if outcome.is_change() {
            self.cache.put(self.key.clone(), next.clone());
            self.publish(next);
        }
    }

    fn publish(&mut self, snapshot: Snapshot<R>) {
        self.current = snapshot;
        self.snapshot_tx.send_replace(self.current.clone());
    }
}

/// Next connection state; never resolves once the monitor has stopped.
async fn next_state(connection: &mut watch::Receiver<ConnectionState>) -> ConnectionState {
    if connection.changed().await.is_err() {
        return std::future::pending().await;
    }
    *connection.borrow_and_update()
}

/// Fetches rows for `R` and validates them against its schema, skipping
/// rows that do not match.
async fn fetch_records<R: Resource>(query: &dyn QueryClient, scope: &Scope) -> Result<Vec<R>, SyncError> {
    let request = FetchRequest::for_resource::<R>(scope.clone());
    let rows = query.fetch(&request).await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<R>(row) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(resource = R::TABLE, "Skipping invalid row: {}", e);
                None
            }
        })
        .collect())
}

fn to_row<R: Resource>(record: &R) -> Result<Value, SyncError> {
    serde_json::to_value(record).map_err(|e| SyncError::InvalidPayload {
        resource: R::TABLE.to_string(),
        reason: e.to_string(),
    })
}

fn from_row<R: Resource>(row: Value) -> Result<R, SyncError> {
    serde_json::from_value(row).map_err(|e| SyncError::InvalidPayload {
        resource: R::TABLE.to_string(),
        reason: e.to_string(),
    })
}
