use crate::handlers::{metrics, orders, ws};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/orders/execute", post(orders::execute_order))
        .route("/orders", get(orders::list_orders))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/cancel", post(orders::cancel_order))
        .route("/orders/{id}/ws", get(ws::order_stream))
        .route("/metrics", get(metrics::get_metrics));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(metrics::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use order_engine::runner::{JobReceiver, job_queue};
    use order_engine::venues::{FixedEntropy, Pacing, SimulatedVenue};
    use order_engine::{EngineConfig, LifecycleEngine, Notifier, RunnerConfig, VenuesConfig};
    use persistence::{MemoryStore, StatusCache};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Router over an engine whose queue is never drained, so submitted
    /// orders stay `pending`.
    fn test_app(settings: Settings) -> (Router, JobReceiver) {
        let (queue, jobs) = job_queue(&RunnerConfig::default());
        let venues = SimulatedVenue::pair(
            &VenuesConfig::default(),
            Arc::new(FixedEntropy(0.5)),
            Pacing::Instant,
        );
        let engine = Arc::new(LifecycleEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StatusCache::new()),
            Arc::new(Notifier::new()),
            Arc::new(queue.clone()),
            venues,
            EngineConfig::default(),
        ));
        let state = AppState::new(engine, queue, settings);
        (create_router(state), jobs)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn valid_order() -> Value {
        json!({
            "tokenIn": "SOL",
            "tokenOut": "USDC",
            "amountIn": 1.5,
            "slippage": 0.01,
            "userId": "alice"
        })
    }

    async fn submit(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(post_json("/api/orders/execute", valid_order()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["orderId"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_execute_returns_created_with_stream_url() {
        let (app, _jobs) = test_app(Settings::default());
        let response = app
            .oneshot(post_json("/api/orders/execute", valid_order()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let id = body["orderId"].as_str().unwrap();
        assert_eq!(body["status"], "pending");
        assert_eq!(
            body["websocketUrl"],
            format!("ws://localhost:3000/api/orders/{}/ws", id)
        );
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_orders() {
        let (app, _jobs) = test_app(Settings::default());

        let mut too_loose = valid_order();
        too_loose["slippage"] = json!(0.9);
        let response = app
            .clone()
            .oneshot(post_json("/api/orders/execute", too_loose))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "BAD_REQUEST");

        let mut limit = valid_order();
        limit["type"] = json!("limit");
        let response = app
            .clone()
            .oneshot(post_json("/api/orders/execute", limit))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post_json("/api/orders/execute", json!({ "tokenIn": "SOL" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Nothing was created
        let response = app.oneshot(get("/api/orders")).await.unwrap();
        assert_eq!(body_json(response).await["total"], 0);
    }

    #[tokio::test]
    async fn test_get_order_detail() {
        let (app, _jobs) = test_app(Settings::default());
        let id = submit(&app).await;

        let response = app
            .clone()
            .oneshot(get(&format!("/api/orders/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["order"]["status"], "pending");
        assert_eq!(body["events"].as_array().unwrap().len(), 1);
        assert!(body["routingDecision"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let (app, _jobs) = test_app(Settings::default());

        let unknown = types::ids::OrderId::new();
        let response = app
            .clone()
            .oneshot(get(&format!("/api/orders/{}", unknown)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "NOT_FOUND");

        let response = app.oneshot(get("/api/orders/not-an-id")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let (app, _jobs) = test_app(Settings::default());
        for _ in 0..3 {
            submit(&app).await;
        }

        let response = app
            .clone()
            .oneshot(get("/api/orders?status=pending&limit=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["limit"], 2);
        assert_eq!(body["orders"].as_array().unwrap().len(), 2);

        let response = app
            .clone()
            .oneshot(get("/api/orders?userId=bob"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["total"], 0);

        let response = app
            .oneshot(get("/api/orders?status=sideways"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_then_conflict() {
        let (app, _jobs) = test_app(Settings::default());
        let id = submit(&app).await;
        let uri = format!("/api/orders/{}/cancel", id);

        let response = app
            .clone()
            .oneshot(post_json(&uri, json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["orderId"], id);
        assert_eq!(body["status"], "cancelled");

        let response = app.oneshot(post_json(&uri, json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_metrics_and_health() {
        let (app, _jobs) = test_app(Settings::default());
        submit(&app).await;

        let response = app.clone().oneshot(get("/api/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ordersLastHour"], 1);
        assert_eq!(body["queue"]["queued"], 1);
        assert_eq!(body["orders"]["total"], 0);
        assert_eq!(body["subscribers"], 0);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_submission_rate_limited_per_user() {
        let mut settings = Settings::default();
        settings.rate_limit.capacity = 2;
        settings.rate_limit.refill_per_sec = 0.0;
        let (app, _jobs) = test_app(settings);

        submit(&app).await;
        submit(&app).await;
        let response = app
            .clone()
            .oneshot(post_json("/api/orders/execute", valid_order()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let mut other = valid_order();
        other["userId"] = json!("bob");
        let response = app
            .oneshot(post_json("/api/orders/execute", other))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
