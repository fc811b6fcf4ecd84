//! Capabilities supplied by the managed backend.
//!
//! The sync core never talks to the network directly; it goes through two
//! seams:
//! - [`QueryClient`]: request/response access (fetch by filter, insert,
//!   update, delete, ping)
//! - [`FeedTransport`]: push channels delivering row changes for one
//!   (resource, scope)
//!
//! [`RestClient`] and [`RealtimeTransport`] implement them against the hosted
//! REST and realtime endpoints; [`MemoryBackend`] implements both in-process.

mod memory;
mod protocol;
mod realtime;
mod rest;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::models::{RawChange, Resource, ResourceKey, Scope};

pub use memory::MemoryBackend;
pub use protocol::{Frame, FrameKind};
pub use realtime::RealtimeTransport;
pub use rest::{RestClient, DEFAULT_PING_TABLE};

/// Message pushed from a feed transport to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// A row change for the channel's resource
    Change(RawChange),
    /// The channel went away; no further messages follow
    Dropped(String),
}

/// Opens change-feed channels.
pub trait FeedTransport: Send + Sync + 'static {
    /// Joins the channel for `key` and starts pushing into `tx`.
    ///
    /// Resolves once the backend acknowledged the subscription. The transport
    /// keeps delivering until `tx` is closed by the consumer or the channel
    /// drops, in which case it sends [`FeedMessage::Dropped`] last.
    fn open<'a>(
        &'a self,
        key: &'a ResourceKey,
        tx: mpsc::Sender<FeedMessage>,
    ) -> BoxFuture<'a, Result<(), SyncError>>;
}

/// Filtered read of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub resource: String,
    pub scope: Scope,
    /// Extra equality filters, all of which must match
    pub filters: Vec<Scope>,
    /// Column to sort by, descending
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(key: &ResourceKey) -> Self {
        Self {
            resource: key.resource.clone(),
            scope: key.scope.clone(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Request shaped by the sort column and limit `R` declares.
    pub fn for_resource<R: Resource>(scope: Scope) -> Self {
        Self {
            resource: R::TABLE.to_string(),
            scope,
            filters: R::FILTERS
                .iter()
                .map(|(column, value)| Scope::new(*column, *value))
                .collect(),
            order_by: R::SORT_COLUMN.map(str::to_string),
            limit: R::FETCH_LIMIT,
        }
    }
}

/// Request/response access to backend tables.
pub trait QueryClient: Send + Sync + 'static {
    /// Rows matching the request's scope and filters, sorted and limited as asked.
    fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<Vec<Value>, SyncError>>;

    /// Inserts a row, returning it as stored.
    fn insert<'a>(&'a self, resource: &'a str, row: Value) -> BoxFuture<'a, Result<Value, SyncError>>;

    /// Merges `patch` into the row with `key`, returning the stored row.
    fn update<'a>(
        &'a self,
        resource: &'a str,
        key: &'a str,
        patch: Value,
    ) -> BoxFuture<'a, Result<Value, SyncError>>;

    /// Deletes the row with `key`.
    fn delete<'a>(&'a self, resource: &'a str, key: &'a str) -> BoxFuture<'a, Result<(), SyncError>>;

    /// Cheap liveness probe.
    fn ping(&self) -> BoxFuture<'_, Result<(), SyncError>>;
}
