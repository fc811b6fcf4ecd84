//! Agrisync Core Library
//!
//! Live, reconciled views of farm-platform resources kept in sync with a
//! hosted backend through its change feed and query API.

pub mod backend;
pub mod error;
pub mod models;
pub mod sync;

pub use backend::{
    FeedMessage, FeedTransport, FetchRequest, MemoryBackend, QueryClient, RealtimeTransport,
    RestClient,
};
pub use error::SyncError;
pub use models::{
    ChangeEvent, ChangeKind, Credit, CreditTransaction, Crop, Farm, FarmActivity,
    FinancialRecord, InsertOrder, Notice, NoticeLevel, Notification, RawChange, Resource,
    ResourceKey, Scope, Snapshot,
};
pub use sync::{
    Backoff, ChangeFeedClient, ConnectionMonitor, ConnectionState, Lookup, Reconciler,
    Subscription, SubscriptionManager, SyncSettings, ViewHandle, ViewStateCache,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
