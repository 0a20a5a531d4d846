use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Outcome a hub reports for one dispatched webhook, as carried on the wire.
///
/// `transport_lost` and `timeout` are never sent by a hub — they are
/// synthesized by the edge's connection registry when a stream dies or an
/// ack never arrives, see `edge::registry::DispatchOutcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    ClientError,
    Transient,
}

/// Messages sent from a hub to the edge over the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// First message on a new connection; opens the session.
    Register {
        hub_id: String,
        endpoint_ids: Vec<String>,
        hub_version: String,
    },
    /// Reports the result of a previously dispatched webhook.
    Ack {
        webhook_id: String,
        outcome: DeliveryOutcome,
        http_status: Option<u16>,
        error_message: Option<String>,
    },
    Heartbeat {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Messages sent from the edge to a hub over the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeMessage {
    Dispatch {
        webhook_id: String,
        endpoint_id: String,
        destination_url: String,
        method: String,
        headers: HashMap<String, String>,
        /// Base64-encoded raw payload.
        payload: String,
    },
    Welcome {
        server_time: chrono::DateTime<chrono::Utc>,
    },
    Rejected {
        reason: String,
    },
    /// Optional server-initiated keepalive; hubs may reply with a `Heartbeat`.
    Ping,
}
