//! Order Engine Service
//!
//! Drives market orders from submission to a terminal outcome: quotes two
//! simulated venues, selects the cheaper one, simulates settlement and
//! mirrors every transition to live subscribers.
//!
//! **Key Invariants:**
//! - Status changes follow the lifecycle graph and are persisted before
//!   they are cached or streamed
//! - One processing job per order id at a time
//! - Venue selection is deterministic for fixed quotes
//! - Counters move exactly once per processed order

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notifier;
pub mod runner;
pub mod selector;
pub mod venues;

pub use config::{EngineConfig, RunnerConfig, VenueConfig, VenuesConfig};
pub use error::EngineError;
pub use lifecycle::{LifecycleEngine, Subscription};
pub use notifier::{Notifier, StreamMessage};
pub use runner::{JobRunner, QueueHandle, RunnerStats};

use persistence::{OrderStore, StatusCache};
use std::sync::Arc;
use venues::LiquidityVenue;

/// A running engine and the job runner feeding it.
pub struct EngineHandle {
    pub engine: Arc<LifecycleEngine>,
    pub runner: JobRunner,
    pub queue: QueueHandle,
}

/// Wire the engine to a fresh job queue and start the runner.
/// Must be called inside a Tokio runtime.
pub fn spawn(
    store: Arc<dyn OrderStore>,
    cache: Arc<StatusCache>,
    venues: [Arc<dyn LiquidityVenue>; 2],
    engine_config: EngineConfig,
    runner_config: RunnerConfig,
) -> EngineHandle {
    let (queue, jobs) = runner::job_queue(&runner_config);
    let engine = Arc::new(LifecycleEngine::new(
        store,
        cache,
        Arc::new(Notifier::new()),
        Arc::new(queue.clone()),
        venues,
        engine_config,
    ));
    let runner = JobRunner::start(runner_config, jobs, engine.clone());
    EngineHandle {
        engine,
        runner,
        queue,
    }
}
