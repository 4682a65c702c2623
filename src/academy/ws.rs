use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::{ApiError, SharedState, require};
use super::auth::CurrentUser;
use super::models::*;
use super::permissions::Capability;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    // Course lifecycle
    CourseCreated { course: Course },
    CourseUpdated { course: Course },
    CourseDeleted { course_id: i64 },

    // Section lifecycle
    SectionCreated { section: Section },
    SectionUpdated { section: Section },
    SectionDeleted { section_id: i64, course_id: i64 },
    SectionsReordered { course_id: i64, section_ids: Vec<i64> },

    // Lesson lifecycle
    LessonCreated { lesson: Lesson },
    LessonUpdated { lesson: Lesson },
    LessonDeleted { lesson_id: i64, section_id: i64 },
    LessonsReordered { section_id: i64, lesson_ids: Vec<i64> },

    // Products
    ProductCreated { product: Product },
    ProductUpdated { product: Product },
    ProductDeleted { product_id: i64 },

    // Sales
    PurchaseCreated { purchase: Purchase },
    PurchaseRefunded { purchase: Purchase },
}

// ── WebSocket handler ────────────────────────────────────────────────

/// The feed carries gated lesson content and buyer details, so only callers
/// who may view sales can subscribe. The caller is checked before the
/// upgrade request is.
pub async fn ws_handler(
    State(state): State<SharedState>,
    user: CurrentUser,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    require(&state, &user, Capability::ViewSales).await?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    debug!(user_id = user.user_id().unwrap_or("-"), "websocket subscriber authorized");
    let rx = state.ws_tx.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, rx)))
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<String>) {
    let (sender, receiver) = socket.split();
    debug!("websocket client connected");
    run_socket_loop(sender, receiver, rx).await;
    debug!("websocket client disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards broadcast events, drains client frames, and sends a Ping every
/// [`PING_INTERVAL`]. A connection that has not answered a Ping within
/// [`PONG_TIMEOUT`] is dropped.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client lagged behind broadcast");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            warn!(error = %e, "failed to serialize WsMessage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_reordered_serialization() {
        let msg = WsMessage::SectionsReordered {
            course_id: 3,
            section_ids: vec![9, 4],
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "SectionsReordered");
        assert_eq!(json["data"]["course_id"], 3);
        assert_eq!(json["data"]["section_ids"], serde_json::json!([9, 4]));
    }

    #[test]
    fn test_lesson_deleted_serialization() {
        let msg = WsMessage::LessonDeleted {
            lesson_id: 7,
            section_id: 2,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"LessonDeleted\""));
        assert!(json.contains("\"lesson_id\":7"));
    }

    #[test]
    fn test_broadcast_message_without_receivers_is_silent() {
        let (tx, _) = broadcast::channel::<String>(4);
        broadcast_message(&tx, &WsMessage::CourseDeleted { course_id: 1 });
    }

    #[tokio::test]
    async fn test_broadcast_message_reaches_subscriber() {
        let (tx, _) = broadcast::channel::<String>(4);
        let mut rx = tx.subscribe();
        broadcast_message(&tx, &WsMessage::ProductDeleted { product_id: 5 });
        let raw = rx.recv().await.unwrap();
        let parsed: WsMessage = serde_json::from_str(&raw).unwrap();
        assert!(matches!(parsed, WsMessage::ProductDeleted { product_id: 5 }));
    }
}
