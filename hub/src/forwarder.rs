//! Last-mile HTTP delivery: turns a `Dispatch` into a local HTTP request
//! and classifies the response into a `DeliveryOutcome`.
//!
//! Grounded on the teacher's `cli/src/tunnel/forwarder.rs::forward_request`
//! — building the destination URL, decoding the base64 payload, stripping
//! hop-by-hop headers, and timing the round trip all carry over. The
//! teacher forwards to a path relative to a tunnel's fixed local target;
//! here the endpoint-to-destination mapping is looked up from the hub's
//! own config instead of always being "localhost".

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::Engine;
use relay_protocol::DeliveryOutcome;

/// Outcome of one forwarding attempt, already mapped onto the wire-level
/// `DeliveryOutcome` the edge expects in an `Ack`.
pub struct ForwardResult {
    pub outcome: DeliveryOutcome,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
    pub duration: Duration,
}

/// Forwards a dispatched webhook to `destination_url`, decoding the
/// base64 `payload` and re-sending it with the original method and
/// (sanitized) headers.
pub async fn forward_request(
    client: &reqwest::Client,
    destination_url: &str,
    method: &str,
    headers: &HashMap<String, String>,
    payload: &str,
) -> Result<ForwardResult> {
    let start = Instant::now();

    let body = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("failed to decode dispatch payload")?;

    let method = method.parse::<reqwest::Method>().unwrap_or(reqwest::Method::POST);

    let mut request = client.request(method, destination_url);
    for (name, value) in headers {
        if !is_hop_by_hop_header(name) {
            request = request.header(name, value);
        }
    }

    let response = match request.body(body).send().await {
        Ok(response) => response,
        Err(error) => {
            return Ok(ForwardResult {
                outcome: DeliveryOutcome::Transient,
                http_status: None,
                error_message: Some(error.to_string()),
                duration: start.elapsed(),
            });
        }
    };

    let status = response.status();
    let duration = start.elapsed();

    Ok(ForwardResult {
        outcome: classify(status),
        http_status: Some(status.as_u16()),
        error_message: None,
        duration,
    })
}

/// `2xx`/`3xx` delivers; `408`/`429` and `5xx` (or a connection failure)
/// are transient and get retried with backoff; any other `4xx` is a
/// permanent client error the dispatcher won't retry.
fn classify(status: reqwest::StatusCode) -> DeliveryOutcome {
    if status.is_success() || status.is_redirection() {
        DeliveryOutcome::Delivered
    } else if status == reqwest::StatusCode::REQUEST_TIMEOUT || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        DeliveryOutcome::Transient
    } else if status.is_client_error() {
        DeliveryOutcome::ClientError
    } else {
        DeliveryOutcome::Transient
    }
}

fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}
