//! Tunables for the sync core.

use std::time::Duration;

use super::backoff::Backoff;
use super::cache::DEFAULT_FRESHNESS_WINDOW;
use super::monitor::ConnectionState;

/// Timing and sizing knobs shared by the cache, the monitor and live views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// How long a fetched snapshot is served from cache
    pub freshness_window: Duration,
    /// Interval between liveness pings while connected
    pub ping_interval: Duration,
    /// First reconnect delay
    pub backoff_base: Duration,
    /// Upper bound on the reconnect delay
    pub backoff_cap: Duration,
    /// Give up and go `Disconnected` after this many consecutive failures.
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Bounded queue size between a feed transport and its consumer
    pub event_queue_capacity: usize,
    /// Background refetch interval while connected
    pub refresh_interval: Duration,
    /// Base of the background refetch backoff while reconnecting
    pub degraded_refresh_base: Duration,
    /// Cap of the background refetch backoff while reconnecting
    pub degraded_refresh_cap: Duration,
    /// Entries kept in the realtime event log
    pub event_log_capacity: usize,
}

impl SyncSettings {
    pub fn monitor_backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_cap)
    }

    /// Background refetch interval for a connection state.
    ///
    /// Refreshes slowly while the feed is healthy and falls back to a capped
    /// exponential schedule while it is not.
    pub fn refresh_interval_for(&self, state: ConnectionState) -> Duration {
        match state {
            ConnectionState::Connected => self.refresh_interval,
            ConnectionState::Reconnecting { attempt } => {
                Backoff::new(self.degraded_refresh_base, self.degraded_refresh_cap)
                    .delay_for(attempt)
            }
            ConnectionState::Disconnected => self.degraded_refresh_cap,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            ping_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            max_reconnect_attempts: None,
            event_queue_capacity: 256,
            refresh_interval: Duration::from_secs(120),
            degraded_refresh_base: Duration::from_secs(5),
            degraded_refresh_cap: Duration::from_secs(60),
            event_log_capacity: 50,
        }
    }
}
