//! Status cache & lifecycle counters
//!
//! Fast, non-authoritative view of each order's latest status for readers
//! that must not touch the store, plus process-wide outcome counters.
//! Everything here can be rebuilt from the store.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use types::ids::OrderId;
use types::order::{Order, OrderStatus};
use types::quote::Venue;

/// Latest known status of one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStatus {
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub updated_at: i64,
}

/// Counter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Failed before a venue was chosen
    pub failed_routing: u64,
    /// `successful / total`, 0 when nothing was processed
    pub success_rate: f64,
    pub routed_by_venue: BTreeMap<Venue, u64>,
}

#[derive(Debug, Default)]
pub struct StatusCache {
    statuses: DashMap<OrderId, CachedStatus>,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    failed_routing: AtomicU64,
    routed_raydium: AtomicU64,
    routed_meteora: AtomicU64,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest status; an older update never overwrites a newer one.
    pub fn upsert(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        data: Option<serde_json::Value>,
        updated_at: i64,
    ) {
        let entry = CachedStatus {
            status,
            data,
            updated_at,
        };
        self.statuses
            .entry(order_id)
            .and_modify(|current| {
                if current.updated_at <= updated_at {
                    *current = entry.clone();
                }
            })
            .or_insert(entry);
    }

    pub fn get(&self, order_id: OrderId) -> Option<CachedStatus> {
        self.statuses.get(&order_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Drop terminal entries last updated before `cutoff` (Unix nanos).
    /// Live orders are always kept. Returns how many entries were removed.
    pub fn evict_terminal(&self, cutoff: i64) -> usize {
        let before = self.statuses.len();
        self.statuses
            .retain(|_, entry| !(entry.status.is_terminal() && entry.updated_at < cutoff));
        before.saturating_sub(self.statuses.len())
    }

    /// Count one order reaching a terminal outcome.
    pub fn record_processed(&self, success: bool, venue: Option<Venue>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(venue) = venue {
            self.venue_counter(venue).fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a failure that happened while quoting, before any venue was
    /// chosen. Called in addition to [`record_processed`](Self::record_processed).
    pub fn record_routing_failure(&self) {
        self.failed_routing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> OrderMetrics {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64
        };
        let routed_by_venue = Venue::ALL
            .iter()
            .map(|v| (*v, self.venue_counter(*v).load(Ordering::Relaxed)))
            .collect();

        OrderMetrics {
            total,
            successful,
            failed,
            failed_routing: self.failed_routing.load(Ordering::Relaxed),
            success_rate,
            routed_by_venue,
        }
    }

    /// Repopulate statuses and counters from stored orders.
    ///
    /// Only confirmed and failed orders count as processed; cancelled
    /// orders never ran. A failed order without a venue failed in routing.
    pub fn rebuild(&self, orders: &[Order]) {
        self.statuses.clear();
        for counter in [
            &self.total,
            &self.successful,
            &self.failed,
            &self.failed_routing,
            &self.routed_raydium,
            &self.routed_meteora,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        for order in orders {
            self.upsert(
                order.id,
                order.status,
                None,
                order.updated_at.unwrap_or(order.created_at),
            );
            match order.status {
                OrderStatus::Confirmed => self.record_processed(true, order.venue),
                OrderStatus::Failed => {
                    self.record_processed(false, order.venue);
                    if order.venue.is_none() {
                        self.record_routing_failure();
                    }
                }
                _ => {}
            }
        }
    }

    fn venue_counter(&self, venue: Venue) -> &AtomicU64 {
        match venue {
            Venue::Raydium => &self.routed_raydium,
            Venue::Meteora => &self.routed_meteora,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::order::{OrderKind, OrderRequest};

    #[test]
    fn test_upsert_keeps_newest() {
        let cache = StatusCache::new();
        let id = OrderId::new();
        cache.upsert(id, OrderStatus::Routing, None, 20);
        cache.upsert(id, OrderStatus::Pending, None, 10);
        assert_eq!(cache.get(id).unwrap().status, OrderStatus::Routing);

        cache.upsert(id, OrderStatus::Building, None, 30);
        assert_eq!(cache.get(id).unwrap().status, OrderStatus::Building);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_metrics_success_rate() {
        let cache = StatusCache::new();
        assert_eq!(cache.metrics().success_rate, 0.0);

        cache.record_processed(true, Some(Venue::Raydium));
        cache.record_processed(true, Some(Venue::Meteora));
        cache.record_processed(true, Some(Venue::Raydium));
        cache.record_processed(false, None);

        let m = cache.metrics();
        assert_eq!((m.total, m.successful, m.failed), (4, 3, 1));
        assert!((m.success_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(m.routed_by_venue[&Venue::Raydium], 2);
        assert_eq!(m.routed_by_venue[&Venue::Meteora], 1);
    }

    #[test]
    fn test_rebuild_from_orders() {
        let request = OrderRequest {
            kind: OrderKind::Market,
            token_in: "SOL".into(),
            token_out: "USDC".into(),
            amount_in: Decimal::ONE,
            slippage: Decimal::new(1, 2),
            user_id: None,
        };
        let mut confirmed = Order::new(OrderId::new(), request.clone(), 1);
        confirmed.status = OrderStatus::Confirmed;
        confirmed.venue = Some(Venue::Meteora);
        let mut cancelled = Order::new(OrderId::new(), request.clone(), 2);
        cancelled.status = OrderStatus::Cancelled;
        let mut unrouted = Order::new(OrderId::new(), request.clone(), 3);
        unrouted.status = OrderStatus::Failed;
        let pending = Order::new(OrderId::new(), request, 4);

        let cache = StatusCache::new();
        cache.record_processed(false, None);
        cache.record_routing_failure();
        cache.rebuild(&[confirmed.clone(), cancelled, unrouted, pending.clone()]);

        let m = cache.metrics();
        assert_eq!((m.total, m.successful, m.failed), (2, 1, 1));
        assert_eq!(m.failed_routing, 1);
        assert_eq!(m.routed_by_venue[&Venue::Meteora], 1);
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.get(pending.id).unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn test_routing_failures_counted_separately() {
        let cache = StatusCache::new();
        cache.record_processed(false, None);
        cache.record_routing_failure();
        cache.record_processed(false, Some(Venue::Raydium));

        let m = cache.metrics();
        assert_eq!((m.failed, m.failed_routing), (2, 1));
    }

    #[test]
    fn test_evict_terminal_keeps_live_orders() {
        let cache = StatusCache::new();
        let (old_done, new_done, old_live) = (OrderId::new(), OrderId::new(), OrderId::new());
        cache.upsert(old_done, OrderStatus::Confirmed, None, 10);
        cache.upsert(new_done, OrderStatus::Failed, None, 100);
        cache.upsert(old_live, OrderStatus::Building, None, 10);

        assert_eq!(cache.evict_terminal(50), 1);
        assert!(cache.get(old_done).is_none());
        assert!(cache.get(new_done).is_some());
        assert!(cache.get(old_live).is_some());
    }
}
