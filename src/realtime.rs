//! Real-time broadcast channel
//!
//! WebSocket endpoint carrying a small event protocol: clients send
//! `message` events that fan out to every connected socket (sender
//! included) and `ping` events answered with a private `pong`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::SharedState;

/// Capacity of the shared broadcast bus. A consumer that lags further than
/// this loses the oldest events instead of blocking the senders.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Events clients may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientEvent {
    Message { data: String },
    Ping,
}

/// Events the server emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerEvent {
    Message { data: String, from: String },
    Pong { timestamp: i64 },
}

/// Upgrade the request to a WebSocket session on the broadcast channel.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let socket_id = short_id();
    debug!("Client connected: {}", socket_id);

    let (mut sink, mut stream) = socket.split();
    let mut bus = state.events.subscribe();
    let (direct, mut direct_rx) = mpsc::channel::<ServerEvent>(16);

    // Greet the new client before relaying anything else.
    let _ = direct
        .send(ServerEvent::Message {
            data: "Connected to server!".to_string(),
            from: "server".to_string(),
        })
        .await;

    // Writer half: merge private replies with the shared bus.
    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                private = direct_rx.recv() => match private {
                    Some(event) => event,
                    None => break,
                },
                shared = bus.recv() => match shared {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} broadcast events for a slow socket", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            match serde_json::to_string(&event) {
                Ok(frame) => {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(encode_error) => warn!("Failed to encode event: {}", encode_error),
            }
        }
    });

    // Reader half: parse client events and dispatch them.
    let events = state.events.clone();
    let reader_id = socket_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(ClientEvent::Message { data }) => {
                    debug!("Message from {}: {}", reader_id, data);
                    // Fan out to every subscriber, the sender included.
                    let _ = events.send(ServerEvent::Message {
                        data,
                        from: reader_id.clone(),
                    });
                }
                Ok(ClientEvent::Ping) => {
                    debug!("Ping from {}", reader_id);
                    let _ = direct
                        .send(ServerEvent::Pong {
                            timestamp: Utc::now().timestamp_millis(),
                        })
                        .await;
                }
                Err(parse_error) => {
                    debug!("Ignoring malformed event from {}: {}", reader_id, parse_error);
                }
            }
        }
    });

    // Whichever half finishes first tears the session down.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    debug!("Client disconnected: {}", socket_id);
}

/// First eight hex chars of a fresh UUID; enough to identify a socket in
/// logs and broadcast frames without handing out a session token.
fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn client_events_deserialize_from_wire_shapes() {
        let message: ClientEvent = serde_json::from_str(r#"{"event":"message","data":"hi"}"#).unwrap();
        assert_eq!(
            message,
            ClientEvent::Message {
                data: "hi".to_string()
            }
        );

        let ping: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(ping, ClientEvent::Ping);
    }

    #[test]
    fn unknown_client_events_fail_to_parse() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"shout","data":"hi"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"data":"no tag"}"#).is_err());
    }

    #[test]
    fn server_events_serialize_with_event_tags() {
        let frame = serde_json::to_string(&ServerEvent::Message {
            data: "hello".to_string(),
            from: "ab12cd34".to_string(),
        })
        .unwrap();
        assert_eq!(frame, r#"{"event":"message","data":"hello","from":"ab12cd34"}"#);

        let pong = serde_json::to_string(&ServerEvent::Pong { timestamp: 1700000000000 }).unwrap();
        assert_eq!(pong, r#"{"event":"pong","timestamp":1700000000000}"#);
    }

    #[test]
    fn short_ids_are_eight_chars_and_unique() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(short_id(), short_id());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_including_the_sender() {
        let (bus, mut first) = broadcast::channel(8);
        let mut second = bus.subscribe();

        let sent = ServerEvent::Message {
            data: "x".to_string(),
            from: "ab12cd34".to_string(),
        };
        bus.send(sent.clone()).unwrap();

        assert_eq!(first.recv().await.unwrap(), sent);
        assert_eq!(second.recv().await.unwrap(), sent);
    }
}
