//! In-memory order store
//!
//! Volatile backend used by tests and by deployments without a journal
//! directory. Each mutation runs under a single write lock.

use async_trait::async_trait;
use tokio::sync::RwLock;
use types::clock::now_nanos;
use types::event::OrderEvent;
use types::ids::OrderId;
use types::order::Order;
use types::quote::RoutingDecision;

use crate::store::{OrderFilter, OrderStore, Projection, StoreError, TransitionRequest};

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Projection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<OrderEvent, StoreError> {
        let mut state = self.state.write().await;
        state.check_insert(order)?;
        Ok(state.apply_insert(order.clone()))
    }

    async fn record_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<(Order, OrderEvent), StoreError> {
        let mut state = self.state.write().await;
        let record = state.prepare_transition(request, now_nanos())?;
        state.apply_transition(&record)
    }

    async fn save_routing_decision(
        &self,
        order_id: OrderId,
        decision: &RoutingDecision,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_decision(order_id)?;
        state.apply_decision(order_id, decision.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.read().await.order(order_id))
    }

    async fn get_events(&self, order_id: OrderId) -> Result<Vec<OrderEvent>, StoreError> {
        Ok(self.state.read().await.events(order_id))
    }

    async fn get_routing_decision(
        &self,
        order_id: OrderId,
    ) -> Result<Option<RoutingDecision>, StoreError> {
        Ok(self.state.read().await.decision(order_id))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        Ok(self.state.read().await.list(filter))
    }

    async fn count_orders(&self, filter: &OrderFilter) -> Result<usize, StoreError> {
        Ok(self.state.read().await.count(filter))
    }
}
