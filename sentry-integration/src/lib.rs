#![deny(missing_docs)]

//! Sentry wiring shared by the edge gateway and the hub agent.

use sentry::{configure_scope, ClientInitGuard, User};

/// Initializes Sentry if a DSN is configured, wiring the `tracing` crate's
/// error-level events into it as captured events and everything else as
/// breadcrumbs. Returns `None` (and leaves the caller's `tracing`
/// subscriber as the only sink) when no DSN is given.
pub fn init(sentry_dsn: &str) -> Option<ClientInitGuard> {
    let client = sentry::init((
        sentry_dsn,
        sentry::ClientOptions {
            send_default_pii: false,
            attach_stacktrace: true,
            traces_sample_rate: 0.0,
            ..Default::default()
        },
    ));

    if client.is_enabled() {
        tracing::info!("sentry integration initialized");
        Some(client)
    } else {
        tracing::warn!("sentry DSN was set but the client failed to initialize");
        None
    }
}

/// Tags subsequent events with the hub connection that produced them, so a
/// dispatch failure can be traced back to a specific home hub.
pub fn set_hub_context(hub_id: &str, endpoint_id: &str) {
    configure_scope(|scope| {
        scope.set_user(Some(User {
            id: Some(hub_id.to_owned()),
            other: std::collections::BTreeMap::from_iter([(
                "endpoint_id".to_owned(),
                sentry::protocol::Value::String(endpoint_id.to_owned()),
            )]),
            ..Default::default()
        }));
    });
}
