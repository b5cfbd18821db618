//! Append-only order event log entries

use crate::ids::OrderId;
use crate::order::OrderStatus;
use serde::{Deserialize, Serialize};

/// One row per lifecycle transition; never updated or deleted.
///
/// Within one order, `sequence` and `timestamp` are both strictly
/// increasing, so ordering by either yields the transition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub order_id: OrderId,
    /// Per-order position in the timeline, starting at 0 for `pending`
    pub sequence: u32,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: i64, // Unix nanos
}

/// Statuses of a timeline, in order.
pub fn status_path(events: &[OrderEvent]) -> Vec<OrderStatus> {
    events.iter().map(|e| e.status).collect()
}
