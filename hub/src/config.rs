use std::collections::HashMap;

use clap::Parser;

/// Hub agent configuration, read from the environment (or CLI flags in dev).
///
/// Mirrors `relay_edge::config::Config`'s `clap::Parser` + `env` shape, the
/// same pattern the teacher's own binaries use.
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-hub")]
#[command(about = "Webhook relay hub agent")]
pub struct Config {
    /// WebSocket URL of the edge gateway's control channel, e.g.
    /// `wss://relay.example.com/hub/stream`.
    #[arg(long, env = "RELAY_URL")]
    pub relay_url: String,

    /// Identifier this hub presents in its `Register` message. Defaults to
    /// a random id if not set, so a single binary can be pointed at
    /// multiple edges without colliding.
    #[arg(long, env = "HUB_ID")]
    pub hub_id: Option<String>,

    /// Bearer token presented to the edge's `StreamAuthenticator`.
    #[arg(long, env = "HUB_AUTH_TOKEN", hide_env_values = true)]
    pub hub_auth_token: Option<String>,

    /// Comma-separated `endpointId=http://local-destination` pairs. Every
    /// inbound `Dispatch` for an endpoint id not listed here is rejected
    /// with a `client_error` `Ack` rather than forwarded blindly.
    #[arg(long, env = "ENDPOINT_MAP", value_parser = parse_endpoint_map)]
    pub endpoint_map: EndpointMap,

    /// Optional Sentry DSN for panic/error reporting.
    #[arg(long, env = "SENTRY_DSN", hide_env_values = true)]
    pub sentry_dsn: Option<String>,
}

/// Endpoint id to local destination base URL, e.g. `ep_abc...` to
/// `http://localhost:8080`.
pub type EndpointMap = HashMap<String, String>;

fn parse_endpoint_map(raw: &str) -> Result<EndpointMap, String> {
    let mut map = EndpointMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (endpoint_id, destination) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid endpoint mapping {pair:?}, expected endpointId=url"))?;
        if endpoint_id.is_empty() || destination.is_empty() {
            return Err(format!("invalid endpoint mapping {pair:?}, expected endpointId=url"));
        }
        map.insert(endpoint_id.to_string(), destination.to_string());
    }
    if map.is_empty() {
        return Err("ENDPOINT_MAP must list at least one endpointId=url pair".to_string());
    }
    Ok(map)
}

impl Config {
    pub fn resolved_hub_id(&self) -> String {
        self.hub_id.clone().unwrap_or_else(generate_hub_id)
    }
}

/// A random `hub_<22-char-base62>` id, generated when `HUB_ID` is unset.
fn generate_hub_id() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..22)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("hub_{suffix}")
}
