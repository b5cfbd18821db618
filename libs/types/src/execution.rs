//! Execution outcomes
//!
//! A terminal order carries either the settlement receipt or the error
//! that stopped it.

use crate::ids::SettlementRef;
use crate::quote::Venue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement receipt produced by a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub settlement_ref: SettlementRef,
    pub venue: Venue,
    /// Realized price after slippage
    pub executed_price: Decimal,
    /// Output amount received at the realized price, net of fee
    pub amount_out: Decimal,
    /// Fee plus settlement cost actually paid
    pub cost_paid: Decimal,
    /// `1 - executed_price / quoted_price`
    pub realized_slippage: Decimal,
    pub executed_at: i64, // Unix nanos
}

/// Final result attached to an order in a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum OrderOutcome {
    Executed(ExecutionOutcome),
    #[serde(rename_all = "camelCase")]
    Failed { error: String, failed_at: i64 },
}

impl OrderOutcome {
    pub fn failed(error: impl Into<String>, failed_at: i64) -> Self {
        OrderOutcome::Failed {
            error: error.into(),
            failed_at,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            OrderOutcome::Failed { error, .. } => Some(error),
            OrderOutcome::Executed(_) => None,
        }
    }

    pub fn execution(&self) -> Option<&ExecutionOutcome> {
        match self {
            OrderOutcome::Executed(outcome) => Some(outcome),
            OrderOutcome::Failed { .. } => None,
        }
    }
}
