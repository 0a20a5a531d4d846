pub mod config;
pub mod forwarder;
pub mod reconnect;

use std::time::Duration;

use futures_util::StreamExt;
use relay_protocol::{DeliveryOutcome, EdgeMessage, HubMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{info, warn};

use crate::config::{Config, EndpointMap};
use crate::reconnect::{reconnect_loop, ConnectionInfo, SessionEnd, READ_TIMEOUT};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Runs the hub agent until `shutdown` resolves: maintains the outbound
/// control channel to the edge with reconnect-with-backoff, forwards
/// every `Dispatch` to the locally configured destination, and reports
/// the outcome back as an `Ack`.
pub async fn run(config: Config, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
    let hub_id = config.resolved_hub_id();
    let register = HubMessage::Register {
        hub_id: hub_id.clone(),
        endpoint_ids: config.endpoint_map.keys().cloned().collect(),
        hub_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let http = reqwest::Client::new();
    let endpoint_map = config.endpoint_map.clone();
    let relay_url = config.relay_url.clone();
    let bearer_token = config.hub_auth_token.clone();

    tokio::select! {
        result = reconnect_loop(&relay_url, register, bearer_token, |info| {
            run_session(info, http.clone(), endpoint_map.clone())
        }) => result,
        _ = shutdown => {
            info!(hub_id, "shutdown requested");
            Ok(())
        }
    }
}

async fn run_session(
    mut info: ConnectionInfo,
    http: reqwest::Client,
    endpoint_map: EndpointMap,
) -> anyhow::Result<SessionEnd> {
    info!(reconnect_count = info.reconnect_count, "connected to relay edge");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately, skip it

    loop {
        tokio::select! {
            message = tokio::time::timeout(READ_TIMEOUT, info.read.next()) => {
                let message = match message {
                    Ok(Some(Ok(message))) => message,
                    Ok(Some(Err(error))) => {
                        warn!(%error, "control channel error");
                        return Ok(SessionEnd::Disconnected);
                    }
                    Ok(None) => return Ok(SessionEnd::Disconnected),
                    Err(_) => {
                        warn!("read timeout, assuming connection is dead");
                        return Ok(SessionEnd::Disconnected);
                    }
                };
                if let Some(reply) = handle_edge_message(message, &http, &endpoint_map).await {
                    if info.tx.send(reply).await.is_err() {
                        return Ok(SessionEnd::Disconnected);
                    }
                }
            }
            _ = heartbeat.tick() => {
                let heartbeat = HubMessage::Heartbeat { timestamp: chrono::Utc::now() };
                if info.tx.send(heartbeat).await.is_err() {
                    return Ok(SessionEnd::Disconnected);
                }
            }
        }
    }
}

/// Handles one inbound WebSocket frame from the edge, returning an `Ack`
/// if the frame was a `Dispatch`.
async fn handle_edge_message(
    message: Message,
    http: &reqwest::Client,
    endpoint_map: &EndpointMap,
) -> Option<HubMessage> {
    let text = match message {
        Message::Text(text) => text.to_string(),
        Message::Binary(data) => String::from_utf8(data.to_vec()).ok()?,
        _ => return None,
    };

    let edge_message: EdgeMessage = match serde_json::from_str(&text) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, "malformed message from edge");
            return None;
        }
    };

    match edge_message {
        EdgeMessage::Dispatch {
            webhook_id,
            endpoint_id,
            destination_url: _,
            method,
            headers,
            payload,
        } => Some(dispatch_to_ack(http, endpoint_map, webhook_id, endpoint_id, method, headers, payload).await),
        EdgeMessage::Ping => Some(HubMessage::Heartbeat { timestamp: chrono::Utc::now() }),
        EdgeMessage::Welcome { .. } | EdgeMessage::Rejected { .. } => None,
    }
}

/// Forwards one dispatch using this hub's own configured destination for
/// `endpoint_id` (never the edge-supplied `destination_url`, which only
/// exists for the edge's own bookkeeping — the hub is the authority on
/// where its endpoints actually live).
async fn dispatch_to_ack(
    http: &reqwest::Client,
    endpoint_map: &EndpointMap,
    webhook_id: String,
    endpoint_id: String,
    method: String,
    headers: std::collections::HashMap<String, String>,
    payload: String,
) -> HubMessage {
    let Some(destination) = endpoint_map.get(&endpoint_id) else {
        warn!(endpoint_id, "dispatch for an endpoint this hub has no destination for");
        return HubMessage::Ack {
            webhook_id,
            outcome: DeliveryOutcome::ClientError,
            http_status: None,
            error_message: Some(format!("hub has no destination configured for {endpoint_id}")),
        };
    };

    match forwarder::forward_request(http, destination, &method, &headers, &payload).await {
        Ok(result) => {
            info!(
                webhook_id,
                endpoint_id,
                status = ?result.http_status,
                duration_ms = result.duration.as_millis() as u64,
                "forwarded webhook"
            );
            HubMessage::Ack {
                webhook_id,
                outcome: result.outcome,
                http_status: result.http_status,
                error_message: result.error_message,
            }
        }
        Err(error) => {
            warn!(webhook_id, endpoint_id, %error, "failed to forward webhook");
            HubMessage::Ack {
                webhook_id,
                outcome: DeliveryOutcome::Transient,
                http_status: None,
                error_message: Some(error.to_string()),
            }
        }
    }
}
