//! Engine error taxonomy

use persistence::StoreError;
use thiserror::Error;
use types::errors::ValidationError;
use types::ids::OrderId;
use types::order::OrderStatus;

use crate::runner::QueueError;
use crate::venues::VenueError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed submission; nothing was stored.
    #[error("Invalid order: {0}")]
    Validation(#[from] ValidationError),

    /// Persisting or enqueueing a new order failed; treat it as not accepted.
    #[error("Order not accepted: {0}")]
    Submission(String),

    #[error("Routing failed: {0}")]
    Routing(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Order {order_id} cannot be cancelled in status {status}")]
    Conflict {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub(crate) fn routing(err: VenueError) -> Self {
        EngineError::Routing(err.to_string())
    }

    pub(crate) fn execution(err: VenueError) -> Self {
        EngineError::Execution(err.to_string())
    }

    /// The order was already moved to `failed` before this error was
    /// returned; running it again cannot change the outcome.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, EngineError::Routing(_) | EngineError::Execution(_))
    }
}

impl From<QueueError> for EngineError {
    fn from(err: QueueError) -> Self {
        EngineError::Submission(err.to_string())
    }
}
