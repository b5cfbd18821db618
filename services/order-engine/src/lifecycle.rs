//! Order lifecycle engine
//!
//! Drives each order along `pending → routing → building → submitted →
//! confirmed`, or into `failed`, and owns the single choke point every
//! status change goes through. The store is written first and is
//! authoritative; the status cache and the subscriber stream are derived
//! from what the store accepted.
//!
//! A re-driven order resumes from its last persisted status: quotes are
//! only requested while no routing decision exists, and execution only
//! happens once the order reached `submitted`. Terminal orders are never
//! driven again. A settlement whose `confirmed` transition could not be
//! stored is kept in memory and reused by the next attempt, so a retry
//! within one process never settles twice.

use async_trait::async_trait;
use dashmap::DashMap;
use persistence::{
    CachedStatus, OrderFilter, OrderMetrics, OrderStore, StatusCache, StoreError,
    TransitionRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use types::clock::now_nanos;
use types::errors::TransitionError;
use types::event::OrderEvent;
use types::execution::{ExecutionOutcome, OrderOutcome};
use types::ids::OrderId;
use types::order::{Order, OrderRequest, OrderStatus};
use types::quote::{Quote, RoutingDecision, Venue};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::notifier::{EventSink, Notifier, StatusUpdate, StreamMessage, SubscriptionHandle};
use crate::runner::{Enqueued, JobQueue, OrderProcessor};
use crate::selector;
use crate::venues::{ExecutionRequest, LiquidityVenue};

/// Result of attaching a live subscriber to an order.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    /// Order state read after the subscriber was attached
    pub order: Order,
    pub latest_event: Option<OrderEvent>,
}

pub struct LifecycleEngine {
    store: Arc<dyn OrderStore>,
    cache: Arc<StatusCache>,
    notifier: Arc<Notifier>,
    queue: Arc<dyn JobQueue>,
    venues: [Arc<dyn LiquidityVenue>; 2],
    config: EngineConfig,
    /// Settlements not yet recorded as `confirmed`
    settled: DashMap<OrderId, ExecutionOutcome>,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<StatusCache>,
        notifier: Arc<Notifier>,
        queue: Arc<dyn JobQueue>,
        venues: [Arc<dyn LiquidityVenue>; 2],
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            queue,
            venues,
            config,
            settled: DashMap::new(),
        }
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Validate, persist as `pending` and schedule processing.
    ///
    /// On error the order must be treated as not accepted. If the store
    /// write succeeded but enqueueing failed the row stays `pending`;
    /// [`resume_incomplete`](Self::resume_incomplete) picks it up later.
    pub async fn submit(&self, request: OrderRequest) -> Result<Order, EngineError> {
        request.validate()?;

        let order = Order::new(OrderId::new(), request, now_nanos());
        let event = self
            .store
            .insert_order(&order)
            .await
            .map_err(|e| EngineError::Submission(e.to_string()))?;
        self.cache
            .upsert(order.id, order.status, None, event.timestamp);

        match self.queue.enqueue(order.id).await {
            Ok(Enqueued::Accepted) => {}
            Ok(Enqueued::Duplicate) => {
                debug!(order_id = %order.id, "Processing already scheduled");
            }
            Err(err) => {
                error!(order_id = %order.id, error = %err, "Order stored but not scheduled");
                return Err(err.into());
            }
        }

        info!(
            order_id = %order.id,
            token_in = %order.token_in,
            token_out = %order.token_out,
            amount_in = %order.amount_in,
            "Order submitted"
        );
        Ok(order)
    }

    /// Schedule every order that has not reached a terminal status, e.g.
    /// after a restart. Returns how many jobs were newly scheduled.
    pub async fn resume_incomplete(&self) -> Result<usize, EngineError> {
        let mut scheduled = 0;
        for status in OrderStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            let filter = OrderFilter {
                status: Some(status),
                ..Default::default()
            };
            for order in self.store.list_orders(&filter).await? {
                if self.queue.enqueue(order.id).await? == Enqueued::Accepted {
                    scheduled += 1;
                }
            }
        }
        if scheduled > 0 {
            info!(scheduled, "Resumed incomplete orders");
        }
        Ok(scheduled)
    }

    // ── Processing ──────────────────────────────────────────────────

    /// Drive one order to a terminal status.
    ///
    /// Routing and execution errors end the order in `failed` and are then
    /// returned so the job runner can account for them. Store errors are
    /// returned without touching the order so a retry can resume it.
    pub async fn process(&self, order_id: OrderId) -> Result<(), EngineError> {
        let order = self.load(order_id).await?;
        if order.is_terminal() {
            debug!(order_id = %order_id, status = %order.status, "Order already terminal");
            return Ok(());
        }

        match self.drive(order).await {
            Ok(()) => Ok(()),
            Err(err @ (EngineError::Routing(_) | EngineError::Execution(_))) => {
                self.fail(order_id, &err).await?;
                Err(err)
            }
            Err(EngineError::Store(store_err)) if is_superseded(&store_err) => {
                // Cancelled between load and the first transition.
                info!(order_id = %order_id, "Order changed underneath processing; stopping");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn drive(&self, order: Order) -> Result<(), EngineError> {
        let mut status = order.status;
        if status == OrderStatus::Pending {
            self.transition(
                order.id,
                status,
                OrderStatus::Routing,
                Some(json!({ "venues": self.venues.iter().map(|v| v.venue()).collect::<Vec<_>>() })),
                None,
            )
            .await?;
            status = OrderStatus::Routing;
        }

        let decision = match self.store.get_routing_decision(order.id).await? {
            Some(decision) => decision,
            None if status == OrderStatus::Routing => self.route(&order).await?,
            None => {
                return Err(EngineError::Routing(format!(
                    "no routing decision recorded for order in status {}",
                    status
                )))
            }
        };

        if status == OrderStatus::Routing {
            self.transition(
                order.id,
                status,
                OrderStatus::Building,
                Some(json!({
                    "venue": decision.venue,
                    "totalCost": decision.total_cost,
                    "reason": decision.reason,
                })),
                None,
            )
            .await?;
            status = OrderStatus::Building;
            self.pause(self.config.building_pause()).await;
        }

        if status == OrderStatus::Building {
            self.transition(
                order.id,
                status,
                OrderStatus::Submitted,
                Some(json!({ "venue": decision.venue })),
                None,
            )
            .await?;
        }

        let outcome = match self.settled.get(&order.id).map(|e| e.value().clone()) {
            Some(outcome) => {
                debug!(order_id = %order.id, settlement_ref = %outcome.settlement_ref, "Reusing earlier settlement");
                outcome
            }
            None => {
                let outcome = self.execute(&order, &decision).await?;
                self.settled.insert(order.id, outcome.clone());
                outcome
            }
        };
        let data = json!({
            "settlementRef": outcome.settlement_ref,
            "executedPrice": outcome.executed_price,
            "amountOut": outcome.amount_out,
        });
        let confirmed = self
            .transition(
                order.id,
                OrderStatus::Submitted,
                OrderStatus::Confirmed,
                Some(data),
                Some(OrderOutcome::Executed(outcome)),
            )
            .await;
        // Keep the settlement only while a retry can still confirm it
        if !matches!(&confirmed, Err(EngineError::Store(err)) if !is_superseded(err)) {
            self.settled.remove(&order.id);
        }
        confirmed?;
        self.cache.record_processed(true, Some(decision.venue));

        info!(order_id = %order.id, venue = %decision.venue, "Order confirmed");
        Ok(())
    }

    /// Quote both venues concurrently, select one and persist the decision.
    async fn route(&self, order: &Order) -> Result<RoutingDecision, EngineError> {
        let [first, second] = &self.venues;
        let (a, b) = tokio::join!(self.quote(first, order), self.quote(second, order));
        let (a, b) = (a?, b?);

        let decision = selector::select(&a, &b, order.amount_in);
        self.store.save_routing_decision(order.id, &decision).await?;
        info!(
            order_id = %order.id,
            venue = %decision.venue,
            total_cost = %decision.total_cost,
            "Routing decided"
        );
        Ok(decision)
    }

    async fn quote(
        &self,
        venue: &Arc<dyn LiquidityVenue>,
        order: &Order,
    ) -> Result<Quote, EngineError> {
        let timeout = self.config.quote_timeout();
        match tokio::time::timeout(
            timeout,
            venue.quote(&order.token_in, &order.token_out, order.amount_in),
        )
        .await
        {
            Ok(result) => result.map_err(EngineError::routing),
            Err(_) => Err(EngineError::Routing(format!(
                "{} quote timed out after {} ms",
                venue.venue(),
                timeout.as_millis()
            ))),
        }
    }

    async fn execute(
        &self,
        order: &Order,
        decision: &RoutingDecision,
    ) -> Result<ExecutionOutcome, EngineError> {
        let venue = self.venue(decision.venue).ok_or_else(|| {
            EngineError::Execution(format!("venue {} is not configured", decision.venue))
        })?;
        let request = ExecutionRequest {
            order_id: order.id,
            amount_in: order.amount_in,
            slippage: order.slippage,
            quoted_price: decision.price,
        };

        let timeout = self.config.execution_timeout();
        match tokio::time::timeout(timeout, venue.execute(&request)).await {
            Ok(result) => result.map_err(EngineError::execution),
            Err(_) => Err(EngineError::Execution(format!(
                "{} settlement timed out after {} ms",
                decision.venue,
                timeout.as_millis()
            ))),
        }
    }

    /// Record the terminal `failed` transition for `err`, unless the order
    /// already ended some other way.
    async fn fail(&self, order_id: OrderId, err: &EngineError) -> Result<(), EngineError> {
        let order = self.load(order_id).await?;
        if order.is_terminal() {
            return Ok(());
        }

        let message = err.to_string();
        self.transition(
            order_id,
            order.status,
            OrderStatus::Failed,
            Some(json!({ "error": message, "failedIn": order.status })),
            Some(OrderOutcome::failed(message.clone(), now_nanos())),
        )
        .await?;
        self.cache.record_processed(false, order.venue);
        if order.status == OrderStatus::Routing {
            self.cache.record_routing_failure();
        }

        error!(order_id = %order_id, failed_in = %order.status, error = %message, "Order failed");
        Ok(())
    }

    // ── Transition ──────────────────────────────────────────────────

    /// Apply one status change: durable row and event first, then the
    /// status cache, then the live subscriber.
    pub async fn transition(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        data: Option<serde_json::Value>,
        outcome: Option<OrderOutcome>,
    ) -> Result<Order, EngineError> {
        let (order, event) = self
            .store
            .record_transition(TransitionRequest {
                order_id,
                from,
                to,
                data,
                outcome,
            })
            .await?;

        self.cache
            .upsert(order_id, event.status, event.data.clone(), event.timestamp);

        let delivered = self
            .notifier
            .send(order_id, &StreamMessage::Update(StatusUpdate::from(&event)));
        if to.is_terminal() {
            self.notifier.detach(order_id);
        }

        debug!(
            order_id = %order_id,
            %from,
            %to,
            sequence = event.sequence,
            delivered,
            "Transition recorded"
        );
        Ok(order)
    }

    /// Cancel an order that has not started processing.
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, EngineError> {
        let order = self.load(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(EngineError::Conflict {
                order_id,
                status: order.status,
            });
        }

        let result = self
            .transition(
                order_id,
                OrderStatus::Pending,
                OrderStatus::Cancelled,
                Some(json!({ "reason": "cancelled by user" })),
                None,
            )
            .await;

        match result {
            Ok(order) => {
                info!(order_id = %order_id, "Order cancelled");
                Ok(order)
            }
            Err(EngineError::Store(err)) if is_superseded(&err) => {
                let current = self.load(order_id).await?;
                warn!(order_id = %order_id, status = %current.status, "Cancel lost race with processing");
                Err(EngineError::Conflict {
                    order_id,
                    status: current.status,
                })
            }
            Err(err) => Err(err),
        }
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Attach `sink` as the live subscriber of an existing order.
    ///
    /// The returned order is read after attaching, so every later
    /// transition reaches the sink.
    pub async fn subscribe(
        &self,
        order_id: OrderId,
        sink: Arc<dyn EventSink>,
    ) -> Result<Subscription, EngineError> {
        self.load(order_id).await?;
        let handle = self.notifier.attach(order_id, sink);
        let order = self.load(order_id).await?;
        let latest_event = self.store.get_events(order_id).await?.pop();
        Ok(Subscription {
            handle,
            order,
            latest_event,
        })
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.notifier.release(handle);
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        self.load(order_id).await
    }

    /// Event timeline in transition order.
    pub async fn get_events(&self, order_id: OrderId) -> Result<Vec<OrderEvent>, EngineError> {
        self.load(order_id).await?;
        Ok(self.store.get_events(order_id).await?)
    }

    pub async fn get_routing_decision(
        &self,
        order_id: OrderId,
    ) -> Result<Option<RoutingDecision>, EngineError> {
        self.load(order_id).await?;
        Ok(self.store.get_routing_decision(order_id).await?)
    }

    /// Matching orders (newest first) and the unpaged total.
    pub async fn list(&self, filter: &OrderFilter) -> Result<(Vec<Order>, usize), EngineError> {
        let orders = self.store.list_orders(filter).await?;
        let total = self.store.count_orders(filter).await?;
        Ok((orders, total))
    }

    pub async fn count(&self, filter: &OrderFilter) -> Result<usize, EngineError> {
        Ok(self.store.count_orders(filter).await?)
    }

    pub fn cached_status(&self, order_id: OrderId) -> Option<CachedStatus> {
        self.cache.get(order_id)
    }

    pub fn metrics(&self) -> OrderMetrics {
        self.cache.metrics()
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    // ── Internal Helpers ────────────────────────────────────────────

    async fn load(&self, order_id: OrderId) -> Result<Order, EngineError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(EngineError::NotFound(order_id))
    }

    fn venue(&self, venue: Venue) -> Option<&Arc<dyn LiquidityVenue>> {
        self.venues.iter().find(|v| v.venue() == venue)
    }

    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[async_trait]
impl OrderProcessor for LifecycleEngine {
    async fn process(&self, order_id: OrderId) -> Result<(), EngineError> {
        LifecycleEngine::process(self, order_id).await
    }
}

/// The order moved on (or ended) since it was read.
fn is_superseded(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::StatusConflict { .. }
            | StoreError::Transition(TransitionError::AlreadyTerminal { .. })
            | StoreError::Transition(TransitionError::Illegal { .. })
    )
}
