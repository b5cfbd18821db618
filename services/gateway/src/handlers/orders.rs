use crate::error::AppError;
use crate::models::{
    CancelOrderResponse, ExecuteOrderRequest, ExecuteOrderResponse, ListOrdersQuery,
    ListOrdersResponse, OrderDetailResponse, parse_order_id,
};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
};

pub async fn execute_order(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExecuteOrderResponse>), AppError> {
    let Json(payload) = payload?;

    // Per-user submission budget
    let key = payload.user_id.as_deref().unwrap_or("anonymous").to_string();
    state.rate_limiter.check(&key)?;

    let order = state.engine.submit(payload.into()).await?;
    let websocket_url = format!(
        "{}/api/orders/{}/ws",
        state.settings.server.ws_base(),
        order.id
    );

    Ok((
        StatusCode::CREATED,
        Json(ExecuteOrderResponse {
            order_id: order.id,
            status: order.status,
            websocket_url,
        }),
    ))
}

pub async fn list_orders(
    State(state): State<AppState>,
    query: Result<Query<ListOrdersQuery>, QueryRejection>,
) -> Result<Json<ListOrdersResponse>, AppError> {
    let Query(query) = query?;
    let filter = query.into_filter()?;
    let (orders, total) = state.engine.list(&filter).await?;

    Ok(Json(ListOrdersResponse {
        orders,
        total,
        limit: filter.limit.unwrap_or_default(),
        offset: filter.offset,
    }))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetailResponse>, AppError> {
    let order_id = parse_order_id(&id)?;
    let order = state.engine.get_order(order_id).await?;
    let events = state.engine.get_events(order_id).await?;
    let routing_decision = state.engine.get_routing_decision(order_id).await?;

    Ok(Json(OrderDetailResponse {
        order,
        events,
        routing_decision,
    }))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelOrderResponse>, AppError> {
    let order_id = parse_order_id(&id)?;
    let order = state.engine.cancel(order_id).await?;

    Ok(Json(CancelOrderResponse {
        order_id: order.id,
        status: order.status,
    }))
}
