//! Types library for the order routing engine
//!
//! This library provides the core type definitions shared by the store,
//! the lifecycle engine and the gateway, so every service agrees on the
//! shape of an order and of everything recorded about it.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, UserId, SettlementRef)
//! - `order`: Order, order requests and the lifecycle graph
//! - `quote`: Venues, quotes and routing decisions
//! - `execution`: Execution outcomes attached to terminal orders
//! - `event`: Append-only order event log entries
//! - `clock`: Unix-nanosecond timestamps
//! - `errors`: Validation and transition errors

// Public modules
pub mod clock;
pub mod errors;
pub mod event;
pub mod execution;
pub mod ids;
pub mod order;
pub mod quote;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::errors::*;
    pub use crate::event::*;
    pub use crate::execution::*;
    pub use crate::ids::*;
    pub use crate::order::*;
    pub use crate::quote::*;
}
