//! Journal-backed order store
//!
//! Every mutation is validated against the in-memory projection, appended
//! to the journal, and only then applied to the projection. Opening the
//! store replays the journal to rebuild the projection, so state survives
//! restarts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use types::clock::now_nanos;
use types::event::OrderEvent;
use types::ids::OrderId;
use types::order::Order;
use types::quote::RoutingDecision;

use crate::journal::{JournalConfig, JournalWriter};
use crate::reader::JournalReader;
use crate::store::{
    OrderFilter, OrderStore, Projection, StoreError, TransitionRecord, TransitionRequest,
};

// ── Journal Records ─────────────────────────────────────────────────

/// What one journal entry carries. The entry `kind` mirrors the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalRecord {
    OrderCreated { order: Order },
    OrderTransition { transition: TransitionRecord },
    RoutingDecided {
        order_id: OrderId,
        decision: RoutingDecision,
    },
}

impl JournalRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            JournalRecord::OrderCreated { .. } => "order_created",
            JournalRecord::OrderTransition { .. } => "order_transition",
            JournalRecord::RoutingDecided { .. } => "routing_decided",
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

struct Inner {
    writer: JournalWriter,
    projection: Projection,
}

impl Inner {
    fn write(&mut self, timestamp: i64, record: &JournalRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(record)?;
        let entry = self.writer.write_record(timestamp, record.kind(), payload)?;
        debug!(sequence = entry.sequence, kind = record.kind(), "Journaled record");
        Ok(())
    }
}

/// Durable store: append-only journal plus a replayed projection.
pub struct JournalStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl JournalStore {
    /// Open (or create) the journal in `config.dir` and replay it.
    pub fn open(config: JournalConfig) -> Result<Self, StoreError> {
        let dir = config.dir.clone();
        let mut reader = JournalReader::open(&dir)?;
        let entries = reader.read_all_validated()?;

        let mut projection = Projection::default();
        for entry in &entries {
            let record: JournalRecord = serde_json::from_slice(&entry.payload)?;
            match record {
                JournalRecord::OrderCreated { order } => {
                    projection.apply_insert(order);
                }
                JournalRecord::OrderTransition { transition } => {
                    projection.apply_transition(&transition)?;
                }
                JournalRecord::RoutingDecided { order_id, decision } => {
                    projection.apply_decision(order_id, decision);
                }
            }
        }

        let mut writer = JournalWriter::open(config)?;
        writer.set_next_sequence(reader.last_sequence().map_or(1, |s| s + 1));
        if !reader.corruption_log().is_empty() {
            warn!(
                corrupt_regions = reader.corruption_log().len(),
                "Journal had an unreadable tail; continuing in a new file"
            );
            writer.start_new_file()?;
        }

        info!(
            dir = %dir.display(),
            entries = entries.len(),
            orders = projection.count(&OrderFilter::default()),
            "Order journal replayed"
        );

        Ok(Self {
            dir,
            inner: Mutex::new(Inner { writer, projection }),
        })
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Snapshot of every stored order, used to warm the status cache.
    pub async fn all_orders(&self) -> Vec<Order> {
        self.inner.lock().await.projection.all_orders()
    }

    /// Flush and fsync the journal.
    pub async fn sync(&self) -> Result<(), StoreError> {
        self.inner.lock().await.writer.sync()?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for JournalStore {
    async fn insert_order(&self, order: &Order) -> Result<OrderEvent, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.projection.check_insert(order)?;
        inner.write(
            order.created_at,
            &JournalRecord::OrderCreated {
                order: order.clone(),
            },
        )?;
        Ok(inner.projection.apply_insert(order.clone()))
    }

    async fn record_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<(Order, OrderEvent), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner.projection.prepare_transition(request, now_nanos())?;
        inner.write(
            record.timestamp,
            &JournalRecord::OrderTransition {
                transition: record.clone(),
            },
        )?;
        inner.projection.apply_transition(&record)
    }

    async fn save_routing_decision(
        &self,
        order_id: OrderId,
        decision: &RoutingDecision,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.projection.check_decision(order_id)?;
        inner.write(
            decision.decided_at,
            &JournalRecord::RoutingDecided {
                order_id,
                decision: decision.clone(),
            },
        )?;
        inner.projection.apply_decision(order_id, decision.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.lock().await.projection.order(order_id))
    }

    async fn get_events(&self, order_id: OrderId) -> Result<Vec<OrderEvent>, StoreError> {
        Ok(self.inner.lock().await.projection.events(order_id))
    }

    async fn get_routing_decision(
        &self,
        order_id: OrderId,
    ) -> Result<Option<RoutingDecision>, StoreError> {
        Ok(self.inner.lock().await.projection.decision(order_id))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        Ok(self.inner.lock().await.projection.list(filter))
    }

    async fn count_orders(&self, filter: &OrderFilter) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.projection.count(filter))
    }
}
