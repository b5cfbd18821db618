//! Order lifecycle types
//!
//! Lifecycle graph:
//!
//! ```text
//! pending ──► routing ──► building ──► submitted ──► confirmed
//!    │           │            │             │
//!    │           └────────────┴─────────────┴──────► failed
//!    ├─────────────────────────────────────────────► failed
//!    └─────────────────────────────────────────────► cancelled
//! ```
//!
//! `confirmed`, `failed` and `cancelled` are terminal.

use crate::errors::{TransitionError, ValidationError};
use crate::execution::OrderOutcome;
use crate::ids::{OrderId, UserId};
use crate::quote::Venue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Smallest accepted slippage tolerance (0.1%).
pub const MIN_SLIPPAGE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
/// Largest accepted slippage tolerance (50%).
pub const MAX_SLIPPAGE: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Order type requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
    Sniper,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "market",
            OrderKind::Limit => "limit",
            OrderKind::Sniper => "sniper",
        }
    }
}

/// Order status along the lifecycle graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted and queued, processing not started
    Pending,
    /// Collecting venue quotes
    Routing,
    /// Venue chosen, preparing the settlement
    Building,
    /// Handed to the venue for settlement
    Submitted,
    /// Settled (terminal)
    Confirmed,
    /// Routing or execution failed (terminal)
    Failed,
    /// Cancelled by the user while pending (terminal)
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Routing,
        OrderStatus::Building,
        OrderStatus::Submitted,
        OrderStatus::Confirmed,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
    ];

    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    /// Whether `next` is a legal edge out of this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Routing)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Routing, Building)
                | (Routing, Failed)
                | (Building, Submitted)
                | (Building, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
        )
    }

    /// Validate the edge `self -> next`.
    pub fn check_transition(&self, next: OrderStatus) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal { status: *self });
        }
        if !self.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: *self,
                to: next,
            });
        }
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Routing => "routing",
            OrderStatus::Building => "building",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown order status: {}", s))
    }
}

/// Inbound order parameters before an id is assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub kind: OrderKind,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub slippage: Decimal,
    pub user_id: Option<UserId>,
}

impl OrderRequest {
    /// Reject malformed submissions before any state is created.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.kind != OrderKind::Market {
            return Err(ValidationError::UnsupportedKind(self.kind.as_str().to_string()));
        }
        let token_in = self.token_in.trim();
        let token_out = self.token_out.trim();
        if token_in.is_empty() || token_out.is_empty() {
            return Err(ValidationError::EmptyToken);
        }
        if token_in.eq_ignore_ascii_case(token_out) {
            return Err(ValidationError::SameToken(token_in.to_string()));
        }
        if self.amount_in <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(self.amount_in.to_string()));
        }
        if self.slippage < MIN_SLIPPAGE || self.slippage > MAX_SLIPPAGE {
            return Err(ValidationError::SlippageOutOfRange {
                value: self.slippage.to_string(),
                min: MIN_SLIPPAGE.to_string(),
                max: MAX_SLIPPAGE.to_string(),
            });
        }
        Ok(())
    }
}

/// Complete order structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub kind: OrderKind,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub slippage: Decimal,
    pub status: OrderStatus,
    pub created_at: i64, // Unix nanos
    pub updated_at: Option<i64>,
    /// Venue chosen during routing, once a decision is persisted
    pub venue: Option<Venue>,
    pub outcome: Option<OrderOutcome>,
    pub user_id: Option<UserId>,
}

impl Order {
    /// Create a new pending order from a request
    pub fn new(id: OrderId, request: OrderRequest, timestamp: i64) -> Self {
        Self {
            id,
            kind: request.kind,
            token_in: request.token_in.trim().to_string(),
            token_out: request.token_out.trim().to_string(),
            amount_in: request.amount_in,
            slippage: request.slippage,
            status: OrderStatus::Pending,
            created_at: timestamp,
            updated_at: None,
            venue: None,
            outcome: None,
            user_id: request.user_id,
        }
    }

    /// Move the order along the lifecycle graph.
    ///
    /// The order is left untouched when the edge is illegal.
    pub fn apply_transition(
        &mut self,
        next: OrderStatus,
        outcome: Option<OrderOutcome>,
        timestamp: i64,
    ) -> Result<(), TransitionError> {
        self.status.check_transition(next)?;
        self.status = next;
        self.updated_at = Some(timestamp);
        if outcome.is_some() {
            self.outcome = outcome;
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
