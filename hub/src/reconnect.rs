//! Resilient control-channel reconnection engine.
//!
//! Grounded on the teacher's `cli/src/tunnel/reconnect.rs`: the fixed
//! backoff schedule, the read-timeout watchdog, and the
//! `reconnect_loop`-calls-`session_fn`-per-connection shape all carry
//! over unchanged. The handshake itself is simplified from the teacher's
//! ephemeral-token `Start`/`Started`/`token_in_use` exchange to this
//! relay's persistent `Register`/`Welcome` pair, so `TokenCollision`
//! has no counterpart here — a hub's identity is a stable `hub_id`/
//! endpoint-id set, not a token the server can reject as taken.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{EdgeMessage, HubMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Why a connection session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Server closed the socket, a read timed out, or a network error
    /// occurred — reconnect with the same identity.
    Disconnected,
    /// A shutdown signal was received; do not reconnect.
    Quit,
}

/// Everything a session needs to run one live connection.
pub struct ConnectionInfo {
    /// Sender for outgoing `HubMessage`s; a spawned writer task drains
    /// this into the WebSocket sink.
    pub tx: mpsc::Sender<HubMessage>,
    pub read: WsSource,
    pub reconnect_count: u32,
}

/// Backoff schedule, indexed by a saturating `backoff_index`.
const BACKOFF: &[Duration] = &[
    Duration::ZERO,
    Duration::from_millis(100),
    Duration::from_millis(1000),
    Duration::from_millis(5000),
];

/// If no control-channel message arrives for this long, the connection is
/// assumed dead and torn down.
pub const READ_TIMEOUT: Duration = Duration::from_secs(45);

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

enum HandshakeError {
    ConnectionFailed(anyhow::Error),
    Rejected(String),
}

async fn handshake(
    relay_url: &str,
    register: &HubMessage,
    bearer_token: Option<&str>,
) -> Result<(WsSink, WsSource), HandshakeError> {
    let mut request = relay_url
        .into_client_request()
        .map_err(|e| HandshakeError::ConnectionFailed(e.into()))?;
    if let Some(token) = bearer_token {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|e: http::header::InvalidHeaderValue| HandshakeError::ConnectionFailed(e.into()))?;
        request.headers_mut().insert(http::header::AUTHORIZATION, value);
    }

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| HandshakeError::ConnectionFailed(e.into()))?;
    let (mut write, mut read) = ws_stream.split();

    let register_json =
        serde_json::to_string(register).map_err(|e| HandshakeError::ConnectionFailed(e.into()))?;
    write
        .send(Message::Text(register_json.into()))
        .await
        .map_err(|e| HandshakeError::ConnectionFailed(e.into()))?;

    let deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let message = tokio::time::timeout(remaining, read.next())
            .await
            .map_err(|_| HandshakeError::ConnectionFailed(anyhow!("timed out waiting for Welcome")))?
            .ok_or_else(|| HandshakeError::ConnectionFailed(anyhow!("connection closed before Welcome")))?
            .map_err(|e| HandshakeError::ConnectionFailed(e.into()))?;

        let Message::Text(text) = message else { continue };
        let edge_message: EdgeMessage = serde_json::from_str(&text)
            .map_err(|e| HandshakeError::ConnectionFailed(anyhow!("invalid message from edge: {e}")))?;
        match edge_message {
            EdgeMessage::Welcome { .. } => return Ok((write, read)),
            EdgeMessage::Rejected { reason } => return Err(HandshakeError::Rejected(reason)),
            EdgeMessage::Ping => continue,
            EdgeMessage::Dispatch { .. } => continue,
        }
    }
}

/// Runs the outer reconnection loop, calling `session_fn` once per
/// successful connection. Backoff resets after any session that stayed
/// connected longer than 10 seconds.
pub async fn reconnect_loop<F, Fut>(
    relay_url: &str,
    register: HubMessage,
    bearer_token: Option<String>,
    session_fn: F,
) -> Result<()>
where
    F: Fn(ConnectionInfo) -> Fut,
    Fut: std::future::Future<Output = Result<SessionEnd>>,
{
    let mut backoff_index: usize = 0;
    let mut last_connected_at: Option<Instant> = None;
    let mut reconnect_count: u32 = 0;

    loop {
        let delay = BACKOFF[backoff_index.min(BACKOFF.len() - 1)];
        if !delay.is_zero() {
            debug!(?delay, reconnect_count, "reconnecting");
            tokio::time::sleep(delay).await;
        }

        let (write, read) = match handshake(relay_url, &register, bearer_token.as_deref()).await {
            Ok(pair) => pair,
            Err(HandshakeError::Rejected(reason)) => {
                return Err(anyhow!("edge rejected registration: {reason}"));
            }
            Err(HandshakeError::ConnectionFailed(error)) => {
                warn!(%error, "connection failed");
                backoff_index = (backoff_index + 1).min(BACKOFF.len() - 1);
                reconnect_count += 1;
                continue;
            }
        };

        if let Some(last) = last_connected_at {
            if last.elapsed() > Duration::from_secs(10) {
                backoff_index = 0;
            }
        }
        last_connected_at = Some(Instant::now());

        let (tx, mut rx) = mpsc::channel::<HubMessage>(64);
        let writer_task = tokio::spawn(async move {
            let mut write = write;
            while let Some(message) = rx.recv().await {
                let Ok(json) = serde_json::to_string(&message) else {
                    continue;
                };
                if write.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        let info = ConnectionInfo { tx, read, reconnect_count };
        let session_result = session_fn(info).await;
        writer_task.abort();

        match session_result {
            Ok(SessionEnd::Disconnected) => {
                backoff_index = (backoff_index + 1).min(BACKOFF.len() - 1);
                reconnect_count += 1;
                debug!("session disconnected, will reconnect");
                continue;
            }
            Ok(SessionEnd::Quit) => return Ok(()),
            Err(error) => return Err(error).context("session error"),
        }
    }
}
