use std::net::SocketAddr;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use clap::Parser;
use relay_edge::config::Config;
use tokio_util::sync::CancellationToken;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let _sentry_guard = config.sentry_dsn.as_deref().and_then(relay_sentry_integration::init);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_edge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();

    info!(base_url = %config.resolved_base_url(), "starting relay edge gateway");

    let (router, dispatcher) = relay_edge::build(&config)
        .await
        .expect("failed to initialize edge gateway");

    let cancel = CancellationToken::new();
    relay_edge::start_background_tasks(dispatcher, cancel.clone());

    let app = router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: tower::BoxError| async {
                    StatusCode::REQUEST_TIMEOUT
                }))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("invalid host/port combination");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    info!(%addr, "listening");
    info!("hub control channel: ws://{addr}/hub/stream");

    let shutdown_cancel = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining in-flight dispatches");
        shutdown_cancel.cancel();
        tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
    })
    .await
    .expect("server error");
}
