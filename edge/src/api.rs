//! Endpoint management and webhook inspection/replay API.
//!
//! Grounded on the teacher's `api/inspection.rs` (list/get/delete
//! handler shape, `impl IntoResponse` per-handler style) generalized
//! from "one webhook.site token" to "one owned endpoint", plus
//! `ResetForReplay` from the queue store contract — a capability the
//! teacher's ephemeral in-memory design never needed.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::crypto::SecretCodec;
use crate::error::RelayError;
use crate::signature::CustomVerificationConfig;
use crate::store::{Endpoint, EndpointUpdate, NewEndpoint, Store, Webhook};

/// Authenticated caller identity. Session/token auth is an external
/// collaborator per the relay's scope boundary; handlers only need the
/// resolved user id, supplied by whatever middleware sits in front of
/// this router in the real deployment and recorded in a request
/// extension (e.g. `x-relay-user-id`).
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserId>()
            .cloned()
            .ok_or((StatusCode::UNAUTHORIZED, "missing authenticated user"))
    }
}

pub struct ApiState {
    pub store: Store,
    pub secret_codec: Option<SecretCodec>,
}

/// Stands in for the real session/auth layer this router sits behind in
/// production: trusts an already-authenticated `x-relay-user-id` header
/// and records it as a request extension for `UserId` to pick up.
pub async fn authenticate_user(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let user_id = request
        .headers()
        .get("x-relay-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    request.extensions_mut().insert(UserId(user_id));
    Ok(next.run(request).await)
}

#[derive(Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Deserialize)]
pub struct CreateEndpointRequest {
    pub name: String,
    pub provider_type: relay_protocol::ProviderType,
    pub destination_url: String,
    pub signature_secret: Option<String>,
    pub verification_config: Option<CustomVerificationConfig>,
}

#[derive(Deserialize, Default)]
pub struct UpdateEndpointRequest {
    pub name: Option<String>,
    pub destination_url: Option<String>,
    pub muted: Option<bool>,
    pub signature_secret: Option<String>,
}

#[derive(Serialize)]
pub struct EndpointResponse {
    pub id: String,
    pub name: String,
    pub provider_type: relay_protocol::ProviderType,
    pub destination_url: String,
    pub muted: bool,
    pub has_secret: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Endpoint> for EndpointResponse {
    fn from(endpoint: Endpoint) -> Self {
        Self {
            has_secret: endpoint.signature_secret_encrypted.is_some(),
            id: endpoint.id,
            name: endpoint.name,
            provider_type: endpoint.provider_type,
            destination_url: endpoint.destination_url,
            muted: endpoint.muted,
            created_at: endpoint.created_at,
            updated_at: endpoint.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub id: String,
    pub endpoint_id: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub headers: std::collections::HashMap<String, String>,
    pub payload_base64: String,
    pub signature_valid: bool,
    pub status: String,
    pub attempts: i64,
    pub last_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
}

impl From<Webhook> for WebhookResponse {
    fn from(webhook: Webhook) -> Self {
        use base64::Engine;
        Self {
            id: webhook.id,
            endpoint_id: webhook.endpoint_id,
            received_at: webhook.received_at,
            headers: webhook.headers,
            payload_base64: base64::engine::general_purpose::STANDARD.encode(&webhook.payload),
            signature_valid: webhook.signature_valid,
            status: webhook.status.to_string(),
            attempts: webhook.attempts,
            last_attempt_at: webhook.last_attempt_at,
            delivered_at: webhook.delivered_at,
            error_message: webhook.error_message,
        }
    }
}

pub async fn create_endpoint(
    State(state): State<Arc<ApiState>>,
    user: UserId,
    Json(request): Json<CreateEndpointRequest>,
) -> Result<Json<EndpointResponse>, RelayError> {
    if request.name.trim().is_empty() {
        return Err(RelayError::Validation("name must not be empty".to_string()));
    }
    if request.destination_url.trim().is_empty() {
        return Err(RelayError::Validation("destination_url must not be empty".to_string()));
    }

    let signature_secret_encrypted = encrypt_optional(&state, request.signature_secret.as_deref())?;
    let verification_config_encrypted = match &request.verification_config {
        Some(config) => {
            let json = serde_json::to_vec(config)
                .map_err(|e| RelayError::Validation(format!("invalid verification_config: {e}")))?;
            encrypt_optional(&state, Some(std::str::from_utf8(&json).unwrap_or_default()))?
        }
        None => None,
    };

    let endpoint = state
        .store
        .create_endpoint(NewEndpoint {
            user_id: user.0,
            name: request.name,
            provider_type: request.provider_type,
            signature_secret_encrypted,
            verification_config_encrypted,
            destination_url: request.destination_url,
        })
        .await?;

    Ok(Json(endpoint.into()))
}

pub async fn list_endpoints(
    State(state): State<Arc<ApiState>>,
    user: UserId,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<EndpointResponse>>, RelayError> {
    let endpoints = state.store.list_endpoints(&user.0, page.limit, page.offset).await?;
    Ok(Json(endpoints.into_iter().map(Into::into).collect()))
}

pub async fn get_endpoint(
    State(state): State<Arc<ApiState>>,
    user: UserId,
    Path(endpoint_id): Path<String>,
) -> Result<Json<EndpointResponse>, RelayError> {
    let endpoint = state
        .store
        .get_endpoint(&endpoint_id, &user.0)
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("endpoint {endpoint_id}")))?;
    Ok(Json(endpoint.into()))
}

pub async fn update_endpoint(
    State(state): State<Arc<ApiState>>,
    user: UserId,
    Path(endpoint_id): Path<String>,
    Json(request): Json<UpdateEndpointRequest>,
) -> Result<Json<EndpointResponse>, RelayError> {
    let signature_secret_encrypted = match &request.signature_secret {
        Some(secret) => Some(encrypt_optional(&state, Some(secret.as_str()))?),
        None => None,
    };

    let updated = state
        .store
        .update_endpoint(
            &endpoint_id,
            &user.0,
            EndpointUpdate {
                name: request.name,
                destination_url: request.destination_url,
                muted: request.muted,
                signature_secret_encrypted,
                verification_config_encrypted: None,
            },
        )
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("endpoint {endpoint_id}")))?;

    Ok(Json(updated.into()))
}

pub async fn delete_endpoint(
    State(state): State<Arc<ApiState>>,
    user: UserId,
    Path(endpoint_id): Path<String>,
) -> Result<(), RelayError> {
    let deleted = state.store.delete_endpoint(&endpoint_id, &user.0).await?;
    if !deleted {
        return Err(RelayError::NotFound(format!("endpoint {endpoint_id}")));
    }
    Ok(())
}

pub async fn list_webhooks(
    State(state): State<Arc<ApiState>>,
    user: UserId,
    Path(endpoint_id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<WebhookResponse>>, RelayError> {
    state
        .store
        .get_endpoint(&endpoint_id, &user.0)
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("endpoint {endpoint_id}")))?;

    let webhooks = state
        .store
        .list_webhooks_for_endpoint(&endpoint_id, page.limit, page.offset)
        .await?;
    Ok(Json(webhooks.into_iter().map(Into::into).collect()))
}

pub async fn get_webhook(
    State(state): State<Arc<ApiState>>,
    user: UserId,
    Path((endpoint_id, webhook_id)): Path<(String, String)>,
) -> Result<Json<WebhookResponse>, RelayError> {
    state
        .store
        .get_endpoint(&endpoint_id, &user.0)
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("endpoint {endpoint_id}")))?;

    let webhook = state
        .store
        .get_webhook(&webhook_id)
        .await?
        .filter(|w| w.endpoint_id == endpoint_id)
        .ok_or_else(|| RelayError::NotFound(format!("webhook {webhook_id}")))?;
    Ok(Json(webhook.into()))
}

/// Administrative reset of a terminal webhook back to `pending`.
/// Allowed from any status per the queue store's `ResetForReplay`.
pub async fn replay_webhook(
    State(state): State<Arc<ApiState>>,
    user: UserId,
    Path((endpoint_id, webhook_id)): Path<(String, String)>,
) -> Result<Json<WebhookResponse>, RelayError> {
    state
        .store
        .get_endpoint(&endpoint_id, &user.0)
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("endpoint {endpoint_id}")))?;

    state
        .store
        .get_webhook(&webhook_id)
        .await?
        .filter(|w| w.endpoint_id == endpoint_id)
        .ok_or_else(|| RelayError::NotFound(format!("webhook {webhook_id}")))?;

    state.store.reset_for_replay(&webhook_id).await?;
    let webhook = state
        .store
        .get_webhook(&webhook_id)
        .await?
        .expect("row just reset cannot have vanished");
    Ok(Json(webhook.into()))
}

fn encrypt_optional(state: &ApiState, plaintext: Option<&str>) -> Result<Option<Vec<u8>>, RelayError> {
    match (plaintext, &state.secret_codec) {
        (None, _) => Ok(None),
        (Some(_), None) => Err(RelayError::Validation(
            "server has no encryption key configured; cannot store secrets".to_string(),
        )),
        (Some(plaintext), Some(codec)) => Ok(Some(codec.encrypt(plaintext.as_bytes()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path as AxPath, Query as AxQuery, State as AxState};

    async fn state() -> Arc<ApiState> {
        Arc::new(ApiState {
            store: Store::connect_in_memory().await.unwrap(),
            secret_codec: None,
        })
    }

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let state = state().await;
        let request = CreateEndpointRequest {
            name: "orders".to_string(),
            provider_type: relay_protocol::ProviderType::Generic,
            destination_url: "http://dest/ok".to_string(),
            signature_secret: None,
            verification_config: None,
        };
        let created = create_endpoint(AxState(state.clone()), UserId("user-1".to_string()), Json(request))
            .await
            .unwrap();

        let listed = list_endpoints(
            AxState(state.clone()),
            UserId("user-1".to_string()),
            AxQuery(Pagination { limit: 50, offset: 0 }),
        )
        .await
        .unwrap();
        assert_eq!(listed.0.len(), 1);
        assert_eq!(listed.0[0].id, created.0.id);
    }

    #[tokio::test]
    async fn cannot_set_secret_without_an_encryption_key() {
        let state = state().await;
        let request = CreateEndpointRequest {
            name: "orders".to_string(),
            provider_type: relay_protocol::ProviderType::Github,
            destination_url: "http://dest/ok".to_string(),
            signature_secret: Some("whsec_abc".to_string()),
            verification_config: None,
        };
        let result = create_endpoint(AxState(state), UserId("user-1".to_string()), Json(request)).await;
        assert!(matches!(result, Err(RelayError::Validation(_))));
    }

    #[tokio::test]
    async fn replay_resets_a_failed_webhook_to_pending() {
        let state = state().await;
        let request = CreateEndpointRequest {
            name: "orders".to_string(),
            provider_type: relay_protocol::ProviderType::Generic,
            destination_url: "http://dest/ok".to_string(),
            signature_secret: None,
            verification_config: None,
        };
        let endpoint = create_endpoint(AxState(state.clone()), UserId("user-1".to_string()), Json(request))
            .await
            .unwrap();

        let webhook = state
            .store
            .create_webhook(&endpoint.0.id, &std::collections::HashMap::new(), b"{}", true)
            .await
            .unwrap();
        state.store.mark_failed_permanent(&webhook.id, "404").await.unwrap();

        let replayed = replay_webhook(
            AxState(state.clone()),
            UserId("user-1".to_string()),
            AxPath((endpoint.0.id, webhook.id)),
        )
        .await
        .unwrap();
        assert_eq!(replayed.0.status, "pending");
        assert_eq!(replayed.0.attempts, 0);
    }
}
