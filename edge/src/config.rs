use clap::Parser;

/// Edge gateway configuration, read from the environment (or CLI flags in dev).
///
/// Mirrors the teacher's own `clap::Parser` + `env` binaries
/// (`play/src/main.rs`, `output-worker/src/main.rs`): every setting has an
/// env var fallback so the process can run unconfigured in a container.
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-edge")]
#[command(about = "Webhook relay edge gateway")]
pub struct Config {
    /// Host to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind to.
    #[arg(short, long, env = "PORT", default_value = "3030")]
    pub port: u16,

    /// Base URL used to build webhook ingestion URLs in API responses.
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Path to the SQLite database file backing the queue store.
    #[arg(long, env = "DATABASE_PATH", default_value = "relay.sqlite3")]
    pub database_path: String,

    /// 64 hex character (32 byte) key used to encrypt/decrypt endpoint secrets.
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Shared bearer token hubs must present in their `Register` message.
    #[arg(long, env = "HUB_AUTH_TOKEN", hide_env_values = true)]
    pub hub_auth_token: Option<String>,

    /// Optional Sentry DSN for panic/error reporting.
    #[arg(long, env = "SENTRY_DSN", hide_env_values = true)]
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn resolved_base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| {
            if self.host == "0.0.0.0" || self.host == "127.0.0.1" || self.host == "localhost" {
                format!("http://localhost:{}", self.port)
            } else {
                format!("http://{}:{}", self.host, self.port)
            }
        })
    }
}
