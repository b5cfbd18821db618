use crate::error::AppError;
use crate::models::MetricsResponse;
use crate::state::AppState;
use axum::{Json, extract::State};
use persistence::OrderFilter;
use serde_json::{Value, json};
use types::clock::{now_nanos, secs_to_nanos};

const RECENT_WINDOW_SECS: i64 = 3_600;

pub async fn get_metrics(State(state): State<AppState>) -> Result<Json<MetricsResponse>, AppError> {
    let now = now_nanos();
    let recent = OrderFilter {
        created_after: Some(now - secs_to_nanos(RECENT_WINDOW_SECS)),
        ..Default::default()
    };

    Ok(Json(MetricsResponse {
        orders: state.engine.metrics(),
        queue: state.queue.stats(),
        subscribers: state.engine.notifier().len(),
        orders_last_hour: state.engine.count(&recent).await?,
        timestamp: now,
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": now_nanos() }))
}
