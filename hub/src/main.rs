use clap::Parser;
use relay_hub::config::Config;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let _sentry_guard = config.sentry_dsn.as_deref().and_then(relay_sentry_integration::init);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_hub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();

    info!(
        relay_url = %config.relay_url,
        endpoints = config.endpoint_map.len(),
        "starting relay hub agent"
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };

    if let Err(error) = relay_hub::run(config, shutdown).await {
        tracing::error!(%error, "hub agent exited with an error");
        std::process::exit(1);
    }
}
