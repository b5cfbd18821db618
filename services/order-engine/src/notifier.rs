//! Notification fan-out
//!
//! Maps each order id to at most one live subscriber and mirrors lifecycle
//! transitions to it. Delivery is best-effort: the store is the source of
//! truth. A failed delivery and a disconnect both end in the same removal
//! path, so a broken subscriber is never retried.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use types::clock::now_nanos;
use types::event::OrderEvent;
use types::ids::OrderId;
use types::order::OrderStatus;

// ── Messages ────────────────────────────────────────────────────────

/// One lifecycle transition as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub order_id: OrderId,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl From<&OrderEvent> for StatusUpdate {
    fn from(event: &OrderEvent) -> Self {
        Self {
            order_id: event.order_id,
            status: event.status,
            data: event.data.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Wire message of an order stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamMessage {
    #[serde(rename_all = "camelCase")]
    Connected { order_id: OrderId, timestamp: i64 },
    Update(StatusUpdate),
}

impl StreamMessage {
    /// True for an update carrying a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamMessage::Update(u) if u.status.is_terminal())
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Subscriber channel closed")]
    Closed,

    #[error("Subscriber is not keeping up")]
    Backpressure,
}

/// Anything that can carry stream messages to a client.
pub trait EventSink: Send + Sync {
    fn deliver(&self, message: &StreamMessage) -> Result<(), TransportError>;
}

impl EventSink for mpsc::Sender<StreamMessage> {
    fn deliver(&self, message: &StreamMessage) -> Result<(), TransportError> {
        self.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

// ── Fan-out ─────────────────────────────────────────────────────────

struct Subscriber {
    id: u64,
    sink: Arc<dyn EventSink>,
    connected_at: i64,
}

/// Identifies one attachment, so a superseded connection cannot remove
/// its successor when it goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub order_id: OrderId,
    id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberInfo {
    pub order_id: OrderId,
    pub connected_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutStats {
    pub count: usize,
    pub subscribers: Vec<SubscriberInfo>,
    /// Subscribers removed after a failed delivery
    pub dropped: u64,
}

#[derive(Default)]
pub struct Notifier {
    subscribers: DashMap<OrderId, Subscriber>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` as the current subscriber for `order_id`, replacing
    /// any earlier one, and send it the `connected` message.
    pub fn attach(&self, order_id: OrderId, sink: Arc<dyn EventSink>) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connected = StreamMessage::Connected {
            order_id,
            timestamp: now_nanos(),
        };
        let handle = SubscriptionHandle { order_id, id };

        if let Err(err) = sink.deliver(&connected) {
            warn!(order_id = %order_id, error = %err, "Subscriber failed on connect");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return handle;
        }

        let replaced = self.subscribers.insert(
            order_id,
            Subscriber {
                id,
                sink,
                connected_at: now_nanos(),
            },
        );
        debug!(order_id = %order_id, superseded = replaced.is_some(), "Subscriber attached");
        handle
    }

    /// Remove whatever subscriber is current for `order_id`.
    pub fn detach(&self, order_id: OrderId) -> bool {
        self.subscribers.remove(&order_id).is_some()
    }

    /// Remove the subscriber behind `handle` if it is still current.
    pub fn release(&self, handle: SubscriptionHandle) -> bool {
        self.subscribers
            .remove_if(&handle.order_id, |_, s| s.id == handle.id)
            .is_some()
    }

    pub fn is_subscribed(&self, order_id: OrderId) -> bool {
        self.subscribers.contains_key(&order_id)
    }

    /// Deliver to the current subscriber of `order_id`. A missing subscriber
    /// is a no-op; a failing one is removed. Returns whether delivery
    /// happened.
    pub fn send(&self, order_id: OrderId, message: &StreamMessage) -> bool {
        let Some((id, sink)) = self
            .subscribers
            .get(&order_id)
            .map(|s| (s.id, s.sink.clone()))
        else {
            return false;
        };
        self.deliver_or_remove(order_id, id, sink.as_ref(), message)
    }

    /// Deliver to every subscriber; failures only affect the failing one.
    /// Returns the number of successful deliveries.
    pub fn broadcast(&self, message: &StreamMessage) -> usize {
        let targets: Vec<(OrderId, u64, Arc<dyn EventSink>)> = self
            .subscribers
            .iter()
            .map(|e| (*e.key(), e.id, e.sink.clone()))
            .collect();

        targets
            .into_iter()
            .filter(|(order_id, id, sink)| {
                self.deliver_or_remove(*order_id, *id, sink.as_ref(), message)
            })
            .count()
    }

    pub fn stats(&self) -> FanoutStats {
        let mut subscribers: Vec<SubscriberInfo> = self
            .subscribers
            .iter()
            .map(|e| SubscriberInfo {
                order_id: *e.key(),
                connected_at: e.connected_at,
            })
            .collect();
        subscribers.sort_by_key(|s| s.connected_at);
        FanoutStats {
            count: subscribers.len(),
            subscribers,
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Tear down every subscriber. Dropping the sinks closes their streams.
    pub fn close(&self) {
        let count = self.subscribers.len();
        self.subscribers.clear();
        debug!(count, "Notifier closed");
    }

    fn deliver_or_remove(
        &self,
        order_id: OrderId,
        id: u64,
        sink: &dyn EventSink,
        message: &StreamMessage,
    ) -> bool {
        match sink.deliver(message) {
            Ok(()) => true,
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "Delivery failed; removing subscriber");
                if self.subscribers.remove_if(&order_id, |_, s| s.id == id).is_some() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                false
            }
        }
    }
}
