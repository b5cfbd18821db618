use persistence::{OrderMetrics, OrderFilter};
use order_engine::RunnerStats;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::event::OrderEvent;
use types::ids::{OrderId, UserId};
use types::order::{Order, OrderKind, OrderRequest, OrderStatus};
use types::quote::RoutingDecision;

use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOrderRequest {
    #[serde(rename = "type", default = "market")]
    pub kind: OrderKind,
    pub token_in: String,
    pub token_out: String,
    #[serde(deserialize_with = "rust_decimal::serde::float::deserialize")]
    pub amount_in: Decimal,
    #[serde(deserialize_with = "rust_decimal::serde::float::deserialize")]
    pub slippage: Decimal,
    pub user_id: Option<String>,
}

fn market() -> OrderKind {
    OrderKind::Market
}

impl From<ExecuteOrderRequest> for OrderRequest {
    fn from(req: ExecuteOrderRequest) -> Self {
        OrderRequest {
            kind: req.kind,
            token_in: req.token_in,
            token_out: req.token_out,
            amount_in: req.amount_in,
            slippage: req.slippage,
            user_id: req.user_id.map(UserId::new),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOrderResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub websocket_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListOrdersQuery {
    pub fn into_filter(self) -> Result<OrderFilter, AppError> {
        let status = self
            .status
            .map(|s| s.parse::<OrderStatus>())
            .transpose()
            .map_err(AppError::BadRequest)?;
        Ok(OrderFilter {
            status,
            user_id: self.user_id.map(UserId::new),
            created_after: None,
            limit: Some(self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)),
            offset: self.offset.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersResponse {
    pub orders: Vec<Order>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailResponse {
    pub order: Order,
    pub events: Vec<OrderEvent>,
    pub routing_decision: Option<RoutingDecision>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub orders: OrderMetrics,
    pub queue: RunnerStats,
    pub subscribers: usize,
    pub orders_last_hour: usize,
    pub timestamp: i64,
}

pub fn parse_order_id(raw: &str) -> Result<OrderId, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid order id: {}", raw)))
}
