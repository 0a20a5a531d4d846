pub mod api;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod ingestion;
pub mod notify;
pub mod registry;
pub mod sanitize;
pub mod signature;
pub mod store;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::ApiState;
use crate::crypto::{SecretCodec, SecretKey};
use crate::dispatcher::Dispatcher;
use crate::ingestion::IngestionState;
use crate::notify::{LoggingNotifier, Notifier};
use crate::registry::Registry;
use crate::store::Store;
use crate::ws::{SharedSecretAuthenticator, StreamAuthenticator, WsState};

pub async fn build(config: &config::Config) -> Result<(Router, Arc<Dispatcher>), sqlx::Error> {
    let store = Store::connect(&config.database_path).await?;
    let registry = Arc::new(Registry::new());

    let secret_codec = config.encryption_key.as_deref().map(|hex_key| {
        let key = SecretKey::from_hex(hex_key).expect("ENCRYPTION_KEY must be 64 hex characters");
        SecretCodec::new(&key)
    });
    if secret_codec.is_none() {
        info!("no ENCRYPTION_KEY configured; endpoint secrets cannot be stored");
    }

    let authenticator: Arc<dyn StreamAuthenticator> =
        Arc::new(SharedSecretAuthenticator::new(config.hub_auth_token.clone()));

    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier);
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), registry.clone(), notifier));

    let ingestion_state = Arc::new(IngestionState {
        store: store.clone(),
        secret_codec: secret_codec.clone(),
    });
    let ws_state = Arc::new(WsState {
        registry: registry.clone(),
        authenticator,
    });
    let api_state = Arc::new(ApiState {
        store: store.clone(),
        secret_codec,
    });

    let ingestion_router = Router::new()
        .route("/h/{endpoint_id}", post(ingestion::receive_webhook))
        .with_state(ingestion_state);
    let ws_router = Router::new()
        .route("/hub/stream", get(ws::hub_stream_handler))
        .with_state(ws_state);
    let api_router = Router::new()
        .nest("/api", api_router())
        .with_state(api_state);

    let router = Router::new()
        .route("/health", get(health_check))
        .merge(ingestion_router)
        .merge(ws_router)
        .merge(api_router);

    Ok((router, dispatcher))
}

fn api_router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/endpoints", get(api::list_endpoints).post(api::create_endpoint))
        .route(
            "/endpoints/{endpoint_id}",
            get(api::get_endpoint)
                .patch(api::update_endpoint)
                .delete(api::delete_endpoint),
        )
        .route("/endpoints/{endpoint_id}/webhooks", get(api::list_webhooks))
        .route("/endpoints/{endpoint_id}/webhooks/{webhook_id}", get(api::get_webhook))
        .route(
            "/endpoints/{endpoint_id}/webhooks/{webhook_id}/replay",
            post(api::replay_webhook),
        )
        .layer(axum::middleware::from_fn(api::authenticate_user))
}

pub fn start_background_tasks(dispatcher: Arc<Dispatcher>, cancel: CancellationToken) {
    let dispatch_cancel = cancel.clone();
    let dispatch_dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        dispatch_dispatcher.run_dispatch_loop(dispatch_cancel).await;
    });

    let sweep_cancel = cancel;
    tokio::spawn(async move {
        dispatcher.run_sweep_loop(sweep_cancel).await;
    });
}

async fn health_check() -> &'static str {
    "ok"
}
