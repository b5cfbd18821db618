//! Order persistence service
//!
//! Durable storage for orders, their lifecycle events and routing
//! decisions, plus the non-authoritative status cache.
//!
//! - `journal`: append-only, CRC32C-checked journal files with rotation
//! - `reader`: sequential replay with torn-tail detection
//! - `store`: the `OrderStore` contract shared by all backends
//! - `memory`: volatile backend
//! - `journal_store`: journal-backed backend, replayed on open
//! - `cache`: latest-status cache and outcome counters

pub mod cache;
pub mod journal;
pub mod journal_store;
pub mod memory;
pub mod reader;
pub mod store;

pub use cache::{CachedStatus, OrderMetrics, StatusCache};
pub use journal::{FlushPolicy, FsyncPolicy, JournalConfig, JournalError};
pub use journal_store::JournalStore;
pub use memory::MemoryStore;
pub use store::{OrderFilter, OrderStore, StoreError, TransitionRecord, TransitionRequest};
