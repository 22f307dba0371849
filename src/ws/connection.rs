//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection,
//! dispatching incoming commands and forwarding filtered events.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use super::subscription::SubscriptionManager;
use crate::domain::{DispatchEvent, TripId};
use crate::service::DispatchService;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads commands from the client and answers them.
/// - Forwards matching events from the [`broadcast::Receiver`] to the client.
pub async fn run_connection(
    socket: WebSocket,
    mut event_rx: broadcast::Receiver<DispatchEvent>,
    dispatch: Arc<DispatchService>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subs = SubscriptionManager::new();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = handle_text_message(&text, &mut subs, &dispatch).await;
                        if let Ok(json) = serde_json::to_string(&response)
                            && ws_tx.send(Message::text(json)).await.is_err() {
                                break;
                            }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !subs.matches(&event) {
                            continue;
                        }
                        let Ok(payload) = serde_json::to_value(&event) else {
                            continue;
                        };
                        let msg = WsMessage::server(
                            uuid::Uuid::new_v4().to_string(),
                            WsMessageType::Event,
                            payload,
                        );
                        if let Ok(json) = serde_json::to_string(&msg)
                            && ws_tx.send(Message::text(json)).await.is_err() {
                                break;
                            }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws client lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("ws connection closed");
}

fn parse_ids(raw: &[String]) -> (Vec<uuid::Uuid>, bool) {
    let wildcard = raw.iter().any(|s| s == "*");
    let ids = raw.iter().filter_map(|s| s.parse().ok()).collect();
    (ids, wildcard)
}

fn parse_trip(raw: &str) -> Option<TripId> {
    raw.parse::<uuid::Uuid>().ok().map(TripId::from_uuid)
}

/// Handles a text message from the client and builds the reply.
async fn handle_text_message(
    text: &str,
    subs: &mut SubscriptionManager,
    dispatch: &DispatchService,
) -> WsMessage {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return WsMessage::error(String::new(), 400, "malformed JSON");
    };
    let Ok(command) = serde_json::from_value::<WsCommand>(msg.payload) else {
        return WsMessage::error(msg.id, 404, "unknown command");
    };

    let payload = match command {
        WsCommand::Subscribe { ids } => {
            let (ids, wildcard) = parse_ids(&ids);
            subs.subscribe(&ids, wildcard);
            serde_json::json!({
                "subscribed": ids,
                "count": subs.count(),
                "wildcard": subs.is_subscribed_all(),
            })
        }
        WsCommand::Unsubscribe { ids } => {
            let (ids, _) = parse_ids(&ids);
            subs.unsubscribe(&ids);
            serde_json::json!({
                "unsubscribed": ids,
                "remaining_count": subs.count(),
            })
        }
        WsCommand::GetTrip { trip_id } => {
            let Some(trip_id) = parse_trip(&trip_id) else {
                return WsMessage::error(msg.id, 400, "invalid trip_id");
            };
            match dispatch.trips().trip(trip_id).await {
                Ok(trip) => serde_json::to_value(trip).unwrap_or_default(),
                Err(e) => return WsMessage::error(msg.id, e.error_code(), e.to_string()),
            }
        }
        WsCommand::GetPresence { trip_id } => {
            let Some(trip_id) = parse_trip(&trip_id) else {
                return WsMessage::error(msg.id, 400, "invalid trip_id");
            };
            match dispatch.presence().projection(trip_id).await {
                Ok(validation) => serde_json::json!({
                    "validation": validation,
                    "audit_log": dispatch.presence().audit_log(trip_id).await,
                }),
                Err(e) => return WsMessage::error(msg.id, e.error_code(), e.to_string()),
            }
        }
    };
    WsMessage::server(msg.id, WsMessageType::Response, payload)
}
