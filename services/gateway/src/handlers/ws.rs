//! Per-order status stream
//!
//! Each connection gets a `connected` frame, a snapshot of the current
//! status and then every later transition. The socket closes after a
//! terminal status is delivered.

use crate::error::AppError;
use crate::models::parse_order_id;
use crate::state::AppState;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use order_engine::notifier::StatusUpdate;
use order_engine::{StreamMessage, Subscription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use types::ids::OrderId;

pub async fn order_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let order_id = parse_order_id(&id)?;
    // Unknown orders are rejected before the upgrade
    state.engine.get_order(order_id).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, order_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, order_id: OrderId) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<StreamMessage>(state.settings.server.ws_buffer.max(1));

    let subscription = match state.engine.subscribe(order_id, Arc::new(tx)).await {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(order_id = %order_id, error = %err, "Stream subscription failed");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let handle = subscription.handle;
    let snapshot = snapshot(&subscription);

    let mut send_task = tokio::spawn(async move {
        // The notifier queues `connected` on attach
        if let Some(connected) = rx.recv().await {
            if send_json(&mut sender, &connected).await.is_err() {
                return;
            }
        }

        let mut last_ts = snapshot.timestamp;
        let snapshot = StreamMessage::Update(snapshot);
        if send_json(&mut sender, &snapshot).await.is_err() {
            return;
        }
        if snapshot.is_terminal() {
            let _ = sender.send(Message::Close(None)).await;
            return;
        }

        while let Some(message) = rx.recv().await {
            // Transitions already covered by the snapshot
            if let StreamMessage::Update(update) = &message {
                if update.timestamp <= last_ts {
                    continue;
                }
                last_ts = update.timestamp;
            }
            if send_json(&mut sender, &message).await.is_err() {
                return;
            }
            if message.is_terminal() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.engine.unsubscribe(handle);
    debug!(order_id = %order_id, "Order stream closed");
}

fn snapshot(subscription: &Subscription) -> StatusUpdate {
    match &subscription.latest_event {
        Some(event) => StatusUpdate::from(event),
        None => StatusUpdate {
            order_id: subscription.order.id,
            status: subscription.order.status,
            data: None,
            timestamp: subscription
                .order
                .updated_at
                .unwrap_or(subscription.order.created_at),
        },
    }
}

async fn send_json<S>(sender: &mut S, message: &StreamMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(message).map_err(|_| ())?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
