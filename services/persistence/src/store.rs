//! Durable order store
//!
//! The store is the source of truth for orders, their event timelines and
//! their routing decisions. Every mutation is a single atomic step: a status
//! transition updates the order row and appends its event together, or not
//! at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use types::errors::TransitionError;
use types::event::OrderEvent;
use types::execution::OrderOutcome;
use types::ids::{OrderId, UserId};
use types::order::{Order, OrderStatus};
use types::quote::RoutingDecision;

use crate::journal::JournalError;
use crate::reader::ReaderError;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Status conflict for {order_id}: expected {expected}, found {actual}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("Transition rejected: {0}")]
    Transition(#[from] TransitionError),

    #[error("Routing decision already recorded for {0}")]
    DecisionExists(OrderId),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Journal replay error: {0}")]
    Replay(#[from] ReaderError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

// ── Requests & Records ──────────────────────────────────────────────

/// A status change as requested by the lifecycle engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub order_id: OrderId,
    /// Status the caller believes is current (compare-and-set)
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub data: Option<serde_json::Value>,
    pub outcome: Option<OrderOutcome>,
}

/// A status change as persisted; replaying it is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub sequence: u32,
    pub timestamp: i64,
    pub data: Option<serde_json::Value>,
    pub outcome: Option<OrderOutcome>,
}

impl TransitionRecord {
    pub fn event(&self) -> OrderEvent {
        OrderEvent {
            order_id: self.order_id,
            sequence: self.sequence,
            status: self.to,
            data: self.data.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Listing filter; results are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub user_id: Option<UserId>,
    /// Only orders created at or after this Unix-nanos instant
    pub created_after: Option<i64>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl OrderFilter {
    fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |s| order.status == s)
            && self
                .user_id
                .as_ref()
                .map_or(true, |u| order.user_id.as_ref() == Some(u))
            && self.created_after.map_or(true, |t| order.created_at >= t)
    }
}

// ── Store Trait ─────────────────────────────────────────────────────

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new `pending` order and its first event.
    async fn insert_order(&self, order: &Order) -> Result<OrderEvent, StoreError>;

    /// Apply one lifecycle transition; returns the updated order and the
    /// appended event.
    async fn record_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<(Order, OrderEvent), StoreError>;

    /// Persist the routing decision; at most one per order.
    async fn save_routing_decision(
        &self,
        order_id: OrderId,
        decision: &RoutingDecision,
    ) -> Result<(), StoreError>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Event timeline in transition order.
    async fn get_events(&self, order_id: OrderId) -> Result<Vec<OrderEvent>, StoreError>;

    async fn get_routing_decision(
        &self,
        order_id: OrderId,
    ) -> Result<Option<RoutingDecision>, StoreError>;

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Number of orders matching `filter`, ignoring limit and offset.
    async fn count_orders(&self, filter: &OrderFilter) -> Result<usize, StoreError>;
}

// ── In-Memory Projection ────────────────────────────────────────────

/// Materialized state shared by the memory and journal stores.
///
/// `check_*` methods validate without mutating; `apply_*` methods mutate
/// and must only be called with input that passed the matching check
/// (or that is being replayed from the journal).
#[derive(Debug, Default)]
pub(crate) struct Projection {
    orders: HashMap<OrderId, Order>,
    events: HashMap<OrderId, Vec<OrderEvent>>,
    decisions: HashMap<OrderId, RoutingDecision>,
}

impl Projection {
    pub fn check_insert(&self, order: &Order) -> Result<(), StoreError> {
        if self.orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }
        Ok(())
    }

    pub fn apply_insert(&mut self, order: Order) -> OrderEvent {
        let event = OrderEvent {
            order_id: order.id,
            sequence: 0,
            status: order.status,
            data: None,
            timestamp: order.created_at,
        };
        self.events.insert(order.id, vec![event.clone()]);
        self.orders.insert(order.id, order);
        event
    }

    /// Validate a transition and stamp it with its sequence and a timestamp
    /// strictly after the order's previous event.
    pub fn prepare_transition(
        &self,
        request: TransitionRequest,
        now: i64,
    ) -> Result<TransitionRecord, StoreError> {
        let order = self
            .orders
            .get(&request.order_id)
            .ok_or(StoreError::NotFound(request.order_id))?;

        order.status.check_transition(request.to)?;
        if order.status != request.from {
            return Err(StoreError::StatusConflict {
                order_id: request.order_id,
                expected: request.from,
                actual: order.status,
            });
        }

        let last = self
            .events
            .get(&request.order_id)
            .and_then(|events| events.last());
        let sequence = last.map_or(0, |e| e.sequence + 1);
        let timestamp = last.map_or(now, |e| now.max(e.timestamp + 1));

        Ok(TransitionRecord {
            order_id: request.order_id,
            from: request.from,
            to: request.to,
            sequence,
            timestamp,
            data: request.data,
            outcome: request.outcome,
        })
    }

    pub fn apply_transition(
        &mut self,
        record: &TransitionRecord,
    ) -> Result<(Order, OrderEvent), StoreError> {
        let order = self
            .orders
            .get_mut(&record.order_id)
            .ok_or(StoreError::NotFound(record.order_id))?;
        order.apply_transition(record.to, record.outcome.clone(), record.timestamp)?;

        let event = record.event();
        self.events
            .entry(record.order_id)
            .or_default()
            .push(event.clone());
        Ok((order.clone(), event))
    }

    pub fn check_decision(&self, order_id: OrderId) -> Result<(), StoreError> {
        if !self.orders.contains_key(&order_id) {
            return Err(StoreError::NotFound(order_id));
        }
        if self.decisions.contains_key(&order_id) {
            return Err(StoreError::DecisionExists(order_id));
        }
        Ok(())
    }

    pub fn apply_decision(&mut self, order_id: OrderId, decision: RoutingDecision) {
        if let Some(order) = self.orders.get_mut(&order_id) {
            order.venue = Some(decision.venue);
        }
        self.decisions.insert(order_id, decision);
    }

    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).cloned()
    }

    pub fn events(&self, order_id: OrderId) -> Vec<OrderEvent> {
        self.events.get(&order_id).cloned().unwrap_or_default()
    }

    pub fn decision(&self, order_id: OrderId) -> Option<RoutingDecision> {
        self.decisions.get(&order_id).cloned()
    }

    pub fn list(&self, filter: &OrderFilter) -> Vec<Order> {
        let mut matching: Vec<&Order> =
            self.orders.values().filter(|o| filter.matches(o)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn count(&self, filter: &OrderFilter) -> usize {
        self.orders.values().filter(|o| filter.matches(o)).count()
    }

    pub fn all_orders(&self) -> Vec<Order> {
        self.orders.values().cloned().collect()
    }
}
