//! The edge side of the hub control channel: WebSocket upgrade, the
//! `Register`/`Welcome` handshake, and demultiplexing `Ack`/`Heartbeat`
//! frames to the connection registry (C3).
//!
//! Grounded on the teacher's `api/websocket.rs` `handle_socket` — the
//! forwarder task, the timeout-driven read loop, and the
//! register-then-stream shape all carry over; the payload (webhook
//! forwarding instead of terminal echo) and the auth step are new.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{EdgeMessage, HubMessage};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use crate::registry::{DispatchOutcome, SharedRegistry, HEARTBEAT_TIMEOUT};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticates a hub's control-channel connection before it is admitted
/// to the registry. Delegated to an external collaborator per the
/// relay's scope boundary — auth/session/token handling lives outside
/// the core; this trait is the seam.
pub trait StreamAuthenticator: Send + Sync {
    fn authenticate(&self, bearer_token: Option<&str>) -> bool;
}

/// Compares the presented bearer token against a single configured
/// shared secret, in constant time.
pub struct SharedSecretAuthenticator {
    token: Option<String>,
}

impl SharedSecretAuthenticator {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl StreamAuthenticator for SharedSecretAuthenticator {
    fn authenticate(&self, bearer_token: Option<&str>) -> bool {
        match (&self.token, bearer_token) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(expected), Some(presented)) => {
                expected.as_bytes().ct_eq(presented.as_bytes()).into()
            }
        }
    }
}

pub struct WsState {
    pub registry: SharedRegistry,
    pub authenticator: Arc<dyn StreamAuthenticator>,
}

pub async fn hub_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
    authorization: Option<TypedHeader<Authorization<Bearer>>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let bearer = authorization.map(|TypedHeader(auth)| auth.token().to_string());
    if !state.authenticator.authenticate(bearer.as_deref()) {
        return (StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<WsState>, addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<EdgeMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let (hub_id, endpoint_ids, token) =
        match await_registration(&mut ws_receiver, &tx, &state.registry).await {
            Some(registered) => registered,
            None => {
                send_task.abort();
                return;
            }
        };

    tracing::info!(hub_id, ?endpoint_ids, %addr, "hub registered");
    for endpoint_id in &endpoint_ids {
        relay_sentry_integration::set_hub_context(&hub_id, endpoint_id);
    }

    loop {
        let next = tokio::time::timeout(HEARTBEAT_TIMEOUT, ws_receiver.next()).await;
        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(error))) => {
                tracing::warn!(hub_id, %error, "hub control channel error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(hub_id, "hub heartbeat timeout, tearing down connection");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let hub_message: HubMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(hub_id, %error, "malformed message from hub");
                continue;
            }
        };

        match hub_message {
            HubMessage::Register { .. } => {
                tracing::warn!(hub_id, "ignoring duplicate Register on an already-registered stream");
            }
            HubMessage::Heartbeat { .. } => {
                for endpoint_id in &endpoint_ids {
                    state.registry.record_heartbeat(endpoint_id);
                }
            }
            HubMessage::Ack {
                webhook_id,
                outcome,
                error_message,
                ..
            } => {
                let dispatch_outcome = DispatchOutcome::from_ack(outcome, error_message);
                for endpoint_id in &endpoint_ids {
                    state.registry.record_heartbeat(endpoint_id);
                    state.registry.ack(endpoint_id, &webhook_id, dispatch_outcome.clone());
                }
            }
        }
    }

    for endpoint_id in &endpoint_ids {
        state.registry.unregister(endpoint_id, token);
    }
    send_task.abort();
}

/// Waits up to `REGISTER_TIMEOUT` for the hub's opening `Register`
/// message and admits it to the registry. Returns `None` if the hub
/// never registers in time or the stream closes first.
async fn await_registration(
    ws_receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    tx: &mpsc::UnboundedSender<EdgeMessage>,
    registry: &SharedRegistry,
) -> Option<(String, Vec<String>, u64)> {
    let next = tokio::time::timeout(REGISTER_TIMEOUT, ws_receiver.next()).await;
    let message = match next {
        Ok(Some(Ok(message))) => message,
        _ => return None,
    };

    let text = match message {
        Message::Text(text) => text.to_string(),
        Message::Binary(data) => String::from_utf8(data.to_vec()).ok()?,
        _ => return None,
    };

    let hub_message: HubMessage = serde_json::from_str(&text).ok()?;
    let HubMessage::Register {
        hub_id,
        endpoint_ids,
        ..
    } = hub_message
    else {
        let _ = tx.send(EdgeMessage::Rejected {
            reason: "first message on a stream must be Register".to_string(),
        });
        return None;
    };

    if endpoint_ids.is_empty() {
        let _ = tx.send(EdgeMessage::Rejected {
            reason: "Register must list at least one endpoint id".to_string(),
        });
        return None;
    }

    let token = registry.generate_token();
    for endpoint_id in &endpoint_ids {
        registry.register(endpoint_id, tx.clone(), token);
    }

    let _ = tx.send(EdgeMessage::Welcome {
        server_time: chrono::Utc::now(),
    });

    Some((hub_id, endpoint_ids, token))
}
