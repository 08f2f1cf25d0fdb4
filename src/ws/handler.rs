//! Per-client websocket session: one loop servicing the egress queue, the
//! server ping ticker, and inbound control messages with a read deadline.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hub::WsHub;
use super::models::ControlRequest;

/// Runs one client session until the peer disconnects, errors, or misses
/// two ping intervals.
pub async fn serve_client(socket: WebSocket, hub: Arc<WsHub>, ping_period: Duration) {
    let (id, mut egress_rx) = hub.register();
    let (mut ws_tx, mut ws_rx) = socket.split();
    info!(client = %id, "websocket client connected");

    let welcome = serde_json::json!({
        "type": "welcome",
        "message": "Connected to monik monitoring stream",
        "time": chrono::Utc::now(),
        "metrics": hub.metrics().stats(),
    })
    .to_string();
    if ws_tx
        .send(Message::Text(Utf8Bytes::from(welcome)))
        .await
        .is_err()
    {
        hub.unregister(id);
        return;
    }

    let read_deadline = ping_period * 2;
    let mut ping = interval(ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.reset(); // skip the immediate first tick
    let mut last_read = Instant::now();

    loop {
        tokio::select! {
            frame = egress_rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(Utf8Bytes::from(frame))).await.is_err() {
                    warn!(client = %id, "write failed, closing session");
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = sleep_until(last_read + read_deadline) => {
                info!(client = %id, "read deadline expired, closing session");
                break;
            }
            incoming = ws_rx.next() => {
                last_read = Instant::now();
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_control(&hub, id, text.as_str());
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws_tx.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        info!(client = %id, "client disconnected");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(client = %id, "ignoring binary frame");
                    }
                    Some(Err(e)) => {
                        warn!(client = %id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    hub.unregister(id);
    info!(client = %id, "websocket session closed");
}

fn handle_control(hub: &Arc<WsHub>, id: Uuid, raw: &str) {
    let request: ControlRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(_) => {
            hub.send_to_client(id, error_frame("Invalid message format"));
            return;
        }
    };

    match request.action.as_str() {
        "subscribe" => {
            let names = requested_interfaces(&request);
            if names.is_empty() {
                hub.send_to_client(id, error_frame("No interface given"));
                return;
            }
            hub.subscribe(id, &names);
            hub.send_to_client(
                id,
                success_frame(&format!("Subscribed to interfaces: {names:?}")),
            );
        }
        "unsubscribe" => {
            let names = requested_interfaces(&request);
            if names.is_empty() {
                hub.send_to_client(id, error_frame("No interface given"));
                return;
            }
            hub.unsubscribe(id, &names);
            hub.send_to_client(
                id,
                success_frame(&format!("Unsubscribed from interfaces: {names:?}")),
            );
        }
        "ping" => {
            let frame = serde_json::json!({
                "type": "pong",
                "time": chrono::Utc::now(),
            })
            .to_string();
            hub.send_to_client(id, frame);
        }
        "get_status" => {
            let frame = serde_json::json!({
                "type": "status",
                "message": "Current websocket status",
                "time": chrono::Utc::now(),
                "connected_at": hub.connected_at(id),
                "metrics": hub.metrics().stats(),
                "subscriptions": hub.subscription_counts(),
            })
            .to_string();
            hub.send_to_client(id, frame);
        }
        _ => {
            hub.send_to_client(id, error_frame("Unknown action"));
        }
    }
}

fn requested_interfaces(request: &ControlRequest) -> Vec<String> {
    if !request.interface.is_empty() {
        vec![request.interface.clone()]
    } else {
        request.interfaces.clone()
    }
}

fn success_frame(message: &str) -> String {
    serde_json::json!({
        "type": "success",
        "message": message,
        "time": chrono::Utc::now(),
    })
    .to_string()
}

fn error_frame(message: &str) -> String {
    serde_json::json!({
        "type": "error",
        "message": message,
        "time": chrono::Utc::now(),
    })
    .to_string()
}
