//! Ingestion handler (component C4): `POST /h/{endpointId}`.
//!
//! Grounded on the teacher's `webhook::receiver::process_webhook`, minus
//! rate limiting and ephemeral-token validation (an endpoint id plays
//! the role the teacher's `token` did) and plus durable persistence via
//! the queue store instead of an in-memory `DashMap`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use crate::crypto::SecretCodec;
use crate::error::RelayError;
use crate::ids;
use crate::sanitize;
use crate::signature::{self, CustomVerificationConfig, VerificationInput};
use crate::store::Store;

pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

pub struct IngestionState {
    pub store: Store,
    pub secret_codec: Option<SecretCodec>,
}

pub async fn receive_webhook(
    State(state): State<Arc<IngestionState>>,
    Path(endpoint_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, RelayError> {
    if body.len() > MAX_PAYLOAD_BYTES {
        return Err(RelayError::PayloadTooLarge {
            actual: body.len(),
            max: MAX_PAYLOAD_BYTES,
        });
    }

    if !ids::is_valid(&endpoint_id, ids::ENDPOINT_PREFIX) {
        return Err(RelayError::NotFound(format!("endpoint {endpoint_id}")));
    }

    let endpoint = state
        .store
        .get_endpoint_by_id(&endpoint_id)
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("endpoint {endpoint_id}")))?;

    let sanitized = sanitize::sanitize_headers(&headers).map_err(|e| RelayError::Validation(e.to_string()))?;

    let signature_valid = verify_signature(&state, &endpoint, &sanitized, &body);

    let webhook = state
        .store
        .create_webhook(&endpoint.id, &sanitized, &body, signature_valid)
        .await?;

    Ok(Json(serde_json::json!({ "id": webhook.id })))
}

fn verify_signature(
    state: &IngestionState,
    endpoint: &crate::store::Endpoint,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> bool {
    let Some(codec) = &state.secret_codec else {
        return false;
    };
    let Some(secret_ciphertext) = &endpoint.signature_secret_encrypted else {
        return false;
    };
    let Ok(secret) = codec.decrypt(secret_ciphertext) else {
        tracing::error!(endpoint_id = %endpoint.id, "failed to decrypt signature secret");
        return false;
    };

    let custom_config: Option<CustomVerificationConfig> = endpoint
        .verification_config_encrypted
        .as_ref()
        .and_then(|ciphertext| codec.decrypt(ciphertext).ok())
        .and_then(|plaintext| serde_json::from_slice(&plaintext).ok());

    signature::verify(VerificationInput {
        provider: endpoint.provider_type,
        headers,
        body,
        secret: Some(&secret),
        custom_config: custom_config.as_ref(),
        telegram_path_secret: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewEndpoint;
    use relay_protocol::ProviderType;

    async fn state_with_endpoint(destination_url: &str) -> (Arc<IngestionState>, String) {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store
            .create_endpoint(NewEndpoint {
                user_id: "user-1".to_string(),
                name: "test".to_string(),
                provider_type: ProviderType::Generic,
                signature_secret_encrypted: None,
                verification_config_encrypted: None,
                destination_url: destination_url.to_string(),
            })
            .await
            .unwrap();
        (
            Arc::new(IngestionState {
                store,
                secret_codec: None,
            }),
            endpoint.id,
        )
    }

    #[tokio::test]
    async fn accepted_webhook_is_durably_pending() {
        let (state, endpoint_id) = state_with_endpoint("http://dest/ok").await;
        let response = receive_webhook(
            State(state.clone()),
            Path(endpoint_id.clone()),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap();

        let id = response.0["id"].as_str().unwrap().to_string();
        let row = state.store.get_webhook(&id).await.unwrap().unwrap();
        assert!(matches!(row.status, crate::store::WebhookStatus::Pending));
        assert!(!row.signature_valid);
    }

    #[tokio::test]
    async fn unknown_endpoint_is_not_found() {
        let (state, _) = state_with_endpoint("http://dest/ok").await;
        let result = receive_webhook(
            State(state),
            Path("ep_does_not_exist".to_string()),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_touching_the_store() {
        let (state, endpoint_id) = state_with_endpoint("http://dest/ok").await;
        let oversized = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let result = receive_webhook(
            State(state),
            Path(endpoint_id),
            HeaderMap::new(),
            Bytes::from(oversized),
        )
        .await;
        assert!(matches!(result, Err(RelayError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn malformed_endpoint_id_is_rejected_before_touching_the_store() {
        let (state, _) = state_with_endpoint("http://dest/ok").await;
        let result = receive_webhook(
            State(state),
            Path("not-an-endpoint-id".to_string()),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }

    #[test]
    fn hop_by_hop_headers_are_excluded() {
        let mut headers = HeaderMap::new();
        headers.insert("Connection", "keep-alive".parse().unwrap());
        headers.insert("X-Forwarded-For", "1.2.3.4".parse().unwrap());
        let sanitized = sanitize::sanitize_headers(&headers).unwrap();
        assert!(!sanitized.contains_key("connection"));
        assert!(sanitized.contains_key("x-forwarded-for"));
    }
}
