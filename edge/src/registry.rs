//! Connection registry (component C3): tracks the at-most-one active hub
//! stream per endpoint and correlates dispatched webhooks with their
//! acknowledgements.
//!
//! Grounded on the teacher's `DashMap`-backed session tracking
//! (`play/src/storage/mod.rs`'s `TokenSession`) generalized from
//! "one webhook.site token" to "one endpoint", plus the
//! request/response correlation the hub side performs in
//! `cli/src/tunnel/websocket.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_protocol::{DeliveryOutcome, EdgeMessage};
use tokio::sync::{mpsc, oneshot};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);

/// Outcome the dispatcher sees for one dispatch attempt. A superset of
/// the wire's `DeliveryOutcome`: `transport_lost` and `timeout` are
/// synthesized here, never sent by a hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    ClientError { error_message: Option<String> },
    Transient { error_message: Option<String> },
    TransportLost,
    Timeout,
}

impl DispatchOutcome {
    /// Builds a dispatch outcome from the fields of a wire `HubMessage::Ack`.
    pub fn from_ack(outcome: DeliveryOutcome, error_message: Option<String>) -> Self {
        match outcome {
            DeliveryOutcome::Delivered => DispatchOutcome::Delivered,
            DeliveryOutcome::ClientError => DispatchOutcome::ClientError { error_message },
            DeliveryOutcome::Transient => DispatchOutcome::Transient { error_message },
        }
    }
}

struct Connection {
    last_heartbeat_at: DateTime<Utc>,
    /// Outbound channel to the task owning this hub's WebSocket.
    sender: mpsc::UnboundedSender<EdgeMessage>,
    /// Webhook id -> resolver for an in-flight `Dispatch`.
    pending: HashMap<String, oneshot::Sender<DispatchOutcome>>,
    /// Opaque token identifying this registration, so a stale task can't
    /// tear down a connection that has since been replaced.
    token: u64,
}

#[derive(Default)]
pub struct Registry {
    connections: DashMap<String, Connection>,
    next_token: std::sync::atomic::AtomicU64,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no hub connected for this endpoint")]
    NotConnected,
    #[error("hub disconnected while waiting for its outcome")]
    ChannelClosed,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a token identifying one hub connection. A hub that
    /// registers several endpoint ids on the same stream shares this one
    /// token across all of them, so a single `unregister` sweep tears
    /// down every endpoint it owned.
    pub fn generate_token(&self) -> u64 {
        self.next_token.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Inserts a new active connection, displacing and draining any prior
    /// one for the same endpoint (its in-flight futures resolve as
    /// `TransportLost`, never counted as a store-level attempt).
    pub fn register(
        &self,
        endpoint_id: &str,
        sender: mpsc::UnboundedSender<EdgeMessage>,
        token: u64,
    ) {
        let now = Utc::now();
        if let Some((_, mut previous)) = self.connections.remove(endpoint_id) {
            drain_pending(&mut previous.pending);
        }
        self.connections.insert(
            endpoint_id.to_string(),
            Connection {
                last_heartbeat_at: now,
                sender,
                pending: HashMap::new(),
                token,
            },
        );
    }

    /// Removes the connection iff `token` still matches the current one
    /// (a reconnect may already have replaced it). Resolves any in-flight
    /// dispatches as `TransportLost`.
    pub fn unregister(&self, endpoint_id: &str, token: u64) {
        if let Some(entry) = self.connections.get(endpoint_id) {
            if entry.token != token {
                return;
            }
        } else {
            return;
        }
        if let Some((_, mut conn)) = self.connections.remove(endpoint_id) {
            drain_pending(&mut conn.pending);
        }
    }

    pub fn is_connected(&self, endpoint_id: &str) -> bool {
        self.connections.contains_key(endpoint_id)
    }

    pub fn last_heartbeat(&self, endpoint_id: &str) -> Option<DateTime<Utc>> {
        self.connections.get(endpoint_id).map(|c| c.last_heartbeat_at)
    }

    pub fn record_heartbeat(&self, endpoint_id: &str) {
        if let Some(mut conn) = self.connections.get_mut(endpoint_id) {
            conn.last_heartbeat_at = Utc::now();
        }
    }

    /// Sends `Dispatch` on the endpoint's stream and returns a receiver
    /// resolved by the matching `Ack`, `TransportLost` on disconnect, or
    /// dropped (never resolved) if the caller should treat it as a
    /// timeout after its own deadline.
    pub fn dispatch(
        &self,
        endpoint_id: &str,
        message: EdgeMessage,
        webhook_id: String,
    ) -> Result<oneshot::Receiver<DispatchOutcome>, DispatchError> {
        let mut conn = self
            .connections
            .get_mut(endpoint_id)
            .ok_or(DispatchError::NotConnected)?;

        let (tx, rx) = oneshot::channel();
        conn.sender
            .send(message)
            .map_err(|_| DispatchError::ChannelClosed)?;
        conn.pending.insert(webhook_id, tx);
        Ok(rx)
    }

    /// Resolves the future registered for `webhook_id`. Idempotent (and a
    /// no-op) for unknown or already-resolved ids.
    pub fn ack(&self, endpoint_id: &str, webhook_id: &str, outcome: DispatchOutcome) {
        if let Some(mut conn) = self.connections.get_mut(endpoint_id) {
            if let Some(resolver) = conn.pending.remove(webhook_id) {
                let _ = resolver.send(outcome);
            }
        }
    }
}

fn drain_pending(pending: &mut HashMap<String, oneshot::Sender<DispatchOutcome>>) {
    for (_, resolver) in pending.drain() {
        let _ = resolver.send(DispatchOutcome::TransportLost);
    }
}

pub type SharedRegistry = Arc<Registry>;

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook_id() -> String {
        "wh_test_id_000000000000000000".to_string()
    }

    #[test]
    fn not_connected_dispatch_is_rejected() {
        let registry = Registry::new();
        let result = registry.dispatch("ep1", EdgeMessage::Ping, webhook_id());
        assert!(matches!(result, Err(DispatchError::NotConnected)));
    }

    #[tokio::test]
    async fn ack_resolves_the_matching_future() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = registry.generate_token();
        registry.register("ep1", tx, token);

        let id = webhook_id();
        let receiver = registry.dispatch("ep1", EdgeMessage::Ping, id.clone()).unwrap();
        registry.ack("ep1", &id, DispatchOutcome::Delivered);

        let outcome = receiver.await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);
    }

    #[tokio::test]
    async fn replacing_a_connection_resolves_its_in_flight_dispatches_as_transport_lost() {
        let registry = Registry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        registry.register("ep1", tx1, registry.generate_token());

        let id = webhook_id();
        let receiver = registry.dispatch("ep1", EdgeMessage::Ping, id.clone()).unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.register("ep1", tx2, registry.generate_token());

        let outcome = receiver.await.unwrap();
        assert_eq!(outcome, DispatchOutcome::TransportLost);
    }

    #[test]
    fn unregister_with_stale_token_is_a_no_op() {
        let registry = Registry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let token1 = registry.generate_token();
        registry.register("ep1", tx1, token1);

        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.register("ep1", tx2, registry.generate_token());

        registry.unregister("ep1", token1);
        assert!(registry.is_connected("ep1"), "stale unregister must not evict the current connection");
    }

    #[test]
    fn ack_for_unknown_webhook_id_is_a_no_op() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("ep1", tx, registry.generate_token());
        registry.ack("ep1", &webhook_id(), DispatchOutcome::Delivered);
    }
}
