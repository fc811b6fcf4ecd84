//! Typed change-feed subscriptions.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::monitor::LostSignal;
use crate::backend::{FeedMessage, FeedTransport};
use crate::models::{ChangeEvent, Resource, ResourceKey, Scope};

/// Opens per-resource channels and validates what they deliver.
///
/// The client never retries: when a channel cannot be opened or drops, it
/// reports to the connection monitor through its [`LostSignal`] and the
/// subscription simply ends.
#[derive(Clone)]
pub struct ChangeFeedClient {
    transport: Arc<dyn FeedTransport>,
    lost: LostSignal,
    capacity: usize,
}

impl ChangeFeedClient {
    pub fn new(transport: Arc<dyn FeedTransport>, lost: LostSignal, capacity: usize) -> Self {
        Self {
            transport,
            lost,
            capacity: capacity.max(1),
        }
    }

    /// Subscribes to changes of `R` within `scope`.
    ///
    /// Always returns a subscription. If the channel could not be opened the
    /// failure has already been reported and the subscription yields nothing.
    pub async fn subscribe<R: Resource>(&self, scope: Scope) -> Subscription<R> {
        let key = ResourceKey::of::<R>(scope);
        let (tx, rx) = mpsc::channel(self.capacity);

        let reported = match self.transport.open(&key, tx).await {
            Ok(()) => {
                tracing::debug!(%key, "Subscribed");
                false
            }
            Err(e) => {
                tracing::warn!(%key, "Subscribe failed: {}", e);
                self.lost.report(e.to_string());
                true
            }
        };

        Subscription {
            key,
            rx,
            lost: self.lost.clone(),
            opened: !reported,
            reported,
            _marker: PhantomData,
        }
    }
}

impl std::fmt::Debug for ChangeFeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeedClient")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// A live channel for one resource and scope.
///
/// Events come out in delivery order, without reordering or deduplication.
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// closes the queue, which tells the transport to leave the channel.
pub struct Subscription<R> {
    key: ResourceKey,
    rx: mpsc::Receiver<FeedMessage>,
    lost: LostSignal,
    opened: bool,
    reported: bool,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Resource> Subscription<R> {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// False if the transport refused the channel.
    pub fn opened(&self) -> bool {
        self.opened
    }

    /// Next validated event, or `None` once the channel is gone.
    ///
    /// Payloads that do not match the schema of `R` are logged and skipped.
    pub async fn next(&mut self) -> Option<ChangeEvent<R>> {
        loop {
            match self.rx.recv().await {
                Some(FeedMessage::Change(raw)) => match ChangeEvent::<R>::from_raw(raw) {
                    Ok(event) => return Some(event),
                    Err(e) => {
                        tracing::warn!(key = %self.key, "Skipping change: {}", e);
                    }
                },
                Some(FeedMessage::Dropped(reason)) => {
                    self.report_lost(&reason);
                    return None;
                }
                None => {
                    self.report_lost("feed closed");
                    return None;
                }
            }
        }
    }

    /// Stops delivery. Events already queued are discarded.
    pub fn unsubscribe(mut self) {
        self.rx.close();
        tracing::debug!(key = %self.key, "Unsubscribed");
    }

    fn report_lost(&mut self, reason: &str) {
        if !self.reported {
            tracing::warn!(key = %self.key, "Channel dropped: {}", reason);
            self.lost.report(reason);
            self.reported = true;
        }
    }
}
