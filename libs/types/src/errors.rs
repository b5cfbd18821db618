//! Error types shared across services
//!
//! Validation errors reject a submission before any state exists;
//! transition errors guard the lifecycle graph.

use crate::order::OrderStatus;
use thiserror::Error;

/// Malformed order submission
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(String),

    #[error("Slippage {value} outside allowed range [{min}, {max}]")]
    SlippageOutOfRange {
        value: String,
        min: String,
        max: String,
    },

    #[error("Token symbol must not be empty")]
    EmptyToken,

    #[error("Input and output token must differ: {0}")]
    SameToken(String),

    #[error("Unsupported order type: {0}")]
    UnsupportedKind(String),
}

/// Illegal lifecycle transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Order already in terminal state: {status}")]
    AlreadyTerminal { status: OrderStatus },

    #[error("Invalid state transition from {from} to {to}")]
    Illegal { from: OrderStatus, to: OrderStatus },
}
