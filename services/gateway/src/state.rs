use crate::rate_limit::RateLimiter;
use crate::settings::Settings;
use order_engine::{LifecycleEngine, QueueHandle};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    pub queue: QueueHandle,
    pub rate_limiter: Arc<RateLimiter>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(engine: Arc<LifecycleEngine>, queue: QueueHandle, settings: Settings) -> Self {
        Self {
            engine,
            queue,
            rate_limiter: Arc::new(RateLimiter::new(
                settings.rate_limit.capacity,
                settings.rate_limit.refill_per_sec,
            )),
            settings: Arc::new(settings),
        }
    }
}
