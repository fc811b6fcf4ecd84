//! Client-side synchronization of backend resources.
//!
//! ## Flow
//!
//! 1. [`SubscriptionManager::view`] starts (or joins) the live view of one
//!    resource and scope
//! 2. The view subscribes through [`ChangeFeedClient`], then loads its
//!    initial snapshot through [`ViewStateCache`]
//! 3. Each validated [`ChangeEvent`](crate::models::ChangeEvent) is folded in
//!    by the [`Reconciler`] and the new snapshot is published
//! 4. [`ConnectionMonitor`] pings the backend; when a dropped connection
//!    comes back, views resubscribe and refetch

mod backoff;
mod cache;
mod event_log;
mod feed;
mod manager;
mod monitor;
mod reconciler;
mod settings;

pub use backoff::Backoff;
pub use cache::{Lookup, ViewStateCache, DEFAULT_FRESHNESS_WINDOW};
pub use event_log::{EventLog, LogEntry, LogKind};
pub use feed::{ChangeFeedClient, Subscription};
pub use manager::{SubscriptionManager, ViewHandle};
pub use monitor::{ConnectionMonitor, ConnectionState, LostSignal, MonitorSettings};
pub use reconciler::{Outcome, Reconciler};
pub use settings::SyncSettings;
