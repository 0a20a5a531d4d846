//! Durable queue store (component C2): a single-writer SQLite database
//! holding endpoints and their webhooks, with every state transition
//! expressed as one SQL statement.
//!
//! Grounded on the shape of the teacher's storage layer
//! (`play/src/storage/mod.rs`) but backed by `sqlx::SqlitePool` instead
//! of an in-memory `DashMap`, since the relay must survive a restart.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use relay_protocol::ProviderType;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Delivered,
    Failed,
    DeadLetter,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub provider_type: ProviderType,
    pub signature_secret_encrypted: Option<Vec<u8>>,
    pub verification_config_encrypted: Option<Vec<u8>>,
    pub destination_url: String,
    pub muted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Webhook {
    pub id: String,
    pub endpoint_id: String,
    pub received_at: DateTime<Utc>,
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
    pub signature_valid: bool,
    pub status: WebhookStatus,
    pub attempts: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub notification_sent: bool,
}

/// A pending webhook joined with the routing information the dispatcher
/// needs but that only lives on the owning endpoint.
#[derive(Debug, Clone)]
pub struct PendingWebhook {
    pub webhook: Webhook,
    pub destination_url: String,
    pub provider_type: ProviderType,
}

pub struct NewEndpoint {
    pub user_id: String,
    pub name: String,
    pub provider_type: ProviderType,
    pub signature_secret_encrypted: Option<Vec<u8>>,
    pub verification_config_encrypted: Option<Vec<u8>>,
    pub destination_url: String,
}

#[derive(Default)]
pub struct EndpointUpdate {
    pub name: Option<String>,
    pub destination_url: Option<String>,
    pub signature_secret_encrypted: Option<Option<Vec<u8>>>,
    pub verification_config_encrypted: Option<Option<Vec<u8>>>,
    pub muted: Option<bool>,
}

/// `backoff(attempts) = min(2^attempts, 3600)` seconds, expressed once in
/// Rust for the property tests and again as a SQL predicate in
/// `get_pending_ready` — the two must stay in lockstep.
pub fn backoff_seconds(attempts: i64) -> i64 {
    if attempts >= 12 {
        3600
    } else {
        (1i64 << attempts).min(3600)
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{database_path}"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single writer connection keeps every state transition
        // serialized; readers (inspection API) use the same pool but WAL
        // lets them proceed without blocking on the writer.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn create_endpoint(&self, new: NewEndpoint) -> Result<Endpoint, sqlx::Error> {
        let id = ids::generate(ids::ENDPOINT_PREFIX);
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO endpoints (id, user_id, name, provider_type, signature_secret_encrypted, \
             verification_config_encrypted, destination_url, muted, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(&new.name)
        .bind(new.provider_type.to_string())
        .bind(&new.signature_secret_encrypted)
        .bind(&new.verification_config_encrypted)
        .bind(&new.destination_url)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(Endpoint {
            id,
            user_id: new.user_id,
            name: new.name,
            provider_type: new.provider_type,
            signature_secret_encrypted: new.signature_secret_encrypted,
            verification_config_encrypted: new.verification_config_encrypted,
            destination_url: new.destination_url,
            muted: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// User-scoped lookup, for the management API.
    pub async fn get_endpoint(&self, id: &str, user_id: &str) -> Result<Option<Endpoint>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM endpoints WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| endpoint_from_row(&r)).transpose()
    }

    /// Unscoped lookup, used by ingestion and the dispatcher: the URL path
    /// (the endpoint id) is itself the capability.
    pub async fn get_endpoint_by_id(&self, id: &str) -> Result<Option<Endpoint>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM endpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| endpoint_from_row(&r)).transpose()
    }

    pub async fn list_endpoints(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Endpoint>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM endpoints WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(endpoint_from_row).collect()
    }

    pub async fn update_endpoint(
        &self,
        id: &str,
        user_id: &str,
        update: EndpointUpdate,
    ) -> Result<Option<Endpoint>, sqlx::Error> {
        let Some(existing) = self.get_endpoint(id, user_id).await? else {
            return Ok(None);
        };

        let name = update.name.unwrap_or(existing.name);
        let destination_url = update.destination_url.unwrap_or(existing.destination_url);
        let signature_secret_encrypted = update
            .signature_secret_encrypted
            .unwrap_or(existing.signature_secret_encrypted);
        let verification_config_encrypted = update
            .verification_config_encrypted
            .unwrap_or(existing.verification_config_encrypted);
        let muted = update.muted.unwrap_or(existing.muted);
        let now = Utc::now();

        sqlx::query(
            "UPDATE endpoints SET name = ?, destination_url = ?, signature_secret_encrypted = ?, \
             verification_config_encrypted = ?, muted = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&destination_url)
        .bind(&signature_secret_encrypted)
        .bind(&verification_config_encrypted)
        .bind(muted)
        .bind(now.timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(Some(Endpoint {
            id: id.to_string(),
            user_id: user_id.to_string(),
            name,
            provider_type: existing.provider_type,
            signature_secret_encrypted,
            verification_config_encrypted,
            destination_url,
            muted,
            created_at: existing.created_at,
            updated_at: now,
        }))
    }

    pub async fn delete_endpoint(&self, id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM endpoints WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_webhook(
        &self,
        endpoint_id: &str,
        headers: &HashMap<String, String>,
        payload: &[u8],
        signature_valid: bool,
    ) -> Result<Webhook, sqlx::Error> {
        let id = ids::generate(ids::WEBHOOK_PREFIX);
        let now = Utc::now();
        let headers_json = serde_json::to_string(headers).unwrap_or_else(|_| "{}".to_string());

        sqlx::query(
            "INSERT INTO webhooks (id, endpoint_id, received_at, headers, payload, signature_valid, \
             status, attempts, notification_sent) VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, 0)",
        )
        .bind(&id)
        .bind(endpoint_id)
        .bind(now.timestamp_millis())
        .bind(&headers_json)
        .bind(payload)
        .bind(signature_valid)
        .execute(&self.pool)
        .await?;

        Ok(Webhook {
            id,
            endpoint_id: endpoint_id.to_string(),
            received_at: now,
            headers: headers.clone(),
            payload: payload.to_vec(),
            signature_valid,
            status: WebhookStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            delivered_at: None,
            error_message: None,
            notification_sent: false,
        })
    }

    pub async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM webhooks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| webhook_from_row(&r)).transpose()
    }

    pub async fn list_webhooks_for_endpoint(
        &self,
        endpoint_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Webhook>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM webhooks WHERE endpoint_id = ? ORDER BY received_at DESC LIMIT ? OFFSET ?",
        )
        .bind(endpoint_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(webhook_from_row).collect()
    }

    /// At most `limit` rows, each the oldest `pending` webhook for its
    /// endpoint whose backoff deadline has elapsed, joined with the
    /// destination the dispatcher needs. `1 << attempts` is SQLite's
    /// integer left shift, mirroring `backoff_seconds` above.
    pub async fn get_pending_ready(&self, limit: i64) -> Result<Vec<PendingWebhook>, sqlx::Error> {
        let now_ms = Utc::now().timestamp_millis();
        let rows = sqlx::query(
            "SELECT w.*, e.destination_url AS dest_url, e.provider_type AS dest_provider_type \
             FROM webhooks w \
             JOIN endpoints e ON e.id = w.endpoint_id \
             WHERE w.status = 'pending' \
               AND e.muted = 0 \
               AND (w.last_attempt_at IS NULL \
                    OR w.last_attempt_at + (MIN(1 << w.attempts, 3600) * 1000) <= ?) \
               AND w.id = ( \
                 SELECT w2.id FROM webhooks w2 \
                 WHERE w2.endpoint_id = w.endpoint_id AND w2.status = 'pending' \
                 ORDER BY w2.received_at ASC, w2.id ASC LIMIT 1 \
               ) \
             ORDER BY w.received_at ASC, w.id ASC \
             LIMIT ?",
        )
        .bind(now_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let webhook = webhook_from_row(row)?;
                let destination_url: String = row.try_get("dest_url")?;
                let provider_type_raw: String = row.try_get("dest_provider_type")?;
                let provider_type = ProviderType::from_str(&provider_type_raw)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok(PendingWebhook {
                    webhook,
                    destination_url,
                    provider_type,
                })
            })
            .collect()
    }

    pub async fn mark_delivered(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhooks SET status = 'delivered', attempts = attempts + 1, \
             last_attempt_at = ?, delivered_at = ?, error_message = NULL WHERE id = ?",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed_permanent(&self, id: &str, err: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhooks SET status = 'failed', attempts = attempts + 1, \
             last_attempt_at = ?, error_message = ? WHERE id = ?",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(err)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_transient_failure(&self, id: &str, err: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhooks SET attempts = attempts + 1, last_attempt_at = ?, error_message = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(err)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Allowed from any status, per the state machine's replay edge.
    pub async fn reset_for_replay(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhooks SET status = 'pending', attempts = 0, last_attempt_at = NULL, \
             delivered_at = NULL, error_message = NULL, notification_sent = 0 WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Promotes stale pending rows to `dead_letter`. Returns the number
    /// promoted so the caller can drive notification-trigger metrics.
    pub async fn mark_dead_letter(&self, max_age: chrono::Duration) -> Result<u64, sqlx::Error> {
        let cutoff = (Utc::now() - max_age).timestamp_millis();
        let result = sqlx::query(
            "UPDATE webhooks SET status = 'dead_letter' WHERE status = 'pending' AND received_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_unnotified_dead_letters(&self, limit: i64) -> Result<Vec<Webhook>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM webhooks WHERE status = 'dead_letter' AND notification_sent = 0 \
             ORDER BY received_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(webhook_from_row).collect()
    }

    /// Also covers `failed` rows: both are terminal states that trigger
    /// exactly one notification, idempotent via `notification_sent`.
    pub async fn mark_notification_sent(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE webhooks SET notification_sent = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_unnotified_failed(&self, limit: i64) -> Result<Vec<Webhook>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM webhooks WHERE status = 'failed' AND notification_sent = 0 \
             ORDER BY received_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(webhook_from_row).collect()
    }

    pub async fn delete_delivered_older_than(&self, max_age: chrono::Duration) -> Result<u64, sqlx::Error> {
        self.delete_status_older_than("delivered", max_age).await
    }

    pub async fn delete_failed_older_than(&self, max_age: chrono::Duration) -> Result<u64, sqlx::Error> {
        self.delete_status_older_than("failed", max_age).await
    }

    pub async fn delete_dead_letter_older_than(&self, max_age: chrono::Duration) -> Result<u64, sqlx::Error> {
        self.delete_status_older_than("dead_letter", max_age).await
    }

    async fn delete_status_older_than(
        &self,
        status: &str,
        max_age: chrono::Duration,
    ) -> Result<u64, sqlx::Error> {
        let cutoff = (Utc::now() - max_age).timestamp_millis();
        let result = sqlx::query("DELETE FROM webhooks WHERE status = ? AND received_at < ?")
            .bind(status)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

fn endpoint_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Endpoint, sqlx::Error> {
    let provider_type_raw: String = row.try_get("provider_type")?;
    let provider_type = ProviderType::from_str(&provider_type_raw)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Endpoint {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        provider_type,
        signature_secret_encrypted: row.try_get("signature_secret_encrypted")?,
        verification_config_encrypted: row.try_get("verification_config_encrypted")?,
        destination_url: row.try_get("destination_url")?,
        muted: row.try_get("muted")?,
        created_at: millis_to_utc(row.try_get("created_at")?),
        updated_at: millis_to_utc(row.try_get("updated_at")?),
    })
}

fn webhook_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Webhook, sqlx::Error> {
    let status_raw: String = row.try_get("status")?;
    let status = WebhookStatus::from_str(&status_raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let headers_json: String = row.try_get("headers")?;
    let headers: HashMap<String, String> = serde_json::from_str(&headers_json).unwrap_or_default();
    let last_attempt_at: Option<i64> = row.try_get("last_attempt_at")?;
    let delivered_at: Option<i64> = row.try_get("delivered_at")?;

    Ok(Webhook {
        id: row.try_get("id")?,
        endpoint_id: row.try_get("endpoint_id")?,
        received_at: millis_to_utc(row.try_get("received_at")?),
        headers,
        payload: row.try_get("payload")?,
        signature_valid: row.try_get("signature_valid")?,
        status,
        attempts: row.try_get("attempts")?,
        last_attempt_at: last_attempt_at.map(millis_to_utc),
        delivered_at: delivered_at.map(millis_to_utc),
        error_message: row.try_get("error_message")?,
        notification_sent: row.try_get("notification_sent")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_endpoint(destination_url: &str) -> NewEndpoint {
        NewEndpoint {
            user_id: "user-1".to_string(),
            name: "test endpoint".to_string(),
            provider_type: ProviderType::Generic,
            signature_secret_encrypted: None,
            verification_config_encrypted: None,
            destination_url: destination_url.to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_endpoint_round_trips() {
        let store = Store::connect_in_memory().await.unwrap();
        let created = store.create_endpoint(sample_endpoint("http://dest/ok")).await.unwrap();
        let fetched = store.get_endpoint_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.destination_url, "http://dest/ok");
        assert!(!fetched.muted);
    }

    #[tokio::test]
    async fn webhook_starts_pending_and_is_immediately_ready() {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store.create_endpoint(sample_endpoint("http://dest/ok")).await.unwrap();
        let webhook = store
            .create_webhook(&endpoint.id, &HashMap::new(), b"{}", true)
            .await
            .unwrap();
        assert_eq!(webhook.attempts, 0);
        assert!(matches!(webhook.status, WebhookStatus::Pending));

        let ready = store.get_pending_ready(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].webhook.id, webhook.id);
        assert_eq!(ready[0].destination_url, "http://dest/ok");
    }

    #[tokio::test]
    async fn only_oldest_pending_per_endpoint_is_ready() {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store.create_endpoint(sample_endpoint("http://dest/ok")).await.unwrap();
        let w1 = store.create_webhook(&endpoint.id, &HashMap::new(), b"1", true).await.unwrap();
        let _w2 = store.create_webhook(&endpoint.id, &HashMap::new(), b"2", true).await.unwrap();

        let ready = store.get_pending_ready(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].webhook.id, w1.id);
    }

    #[tokio::test]
    async fn transient_failure_makes_row_ineligible_until_backoff_elapses() {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store.create_endpoint(sample_endpoint("http://dest/ok")).await.unwrap();
        let w1 = store.create_webhook(&endpoint.id, &HashMap::new(), b"1", true).await.unwrap();

        store.record_transient_failure(&w1.id, "503").await.unwrap();
        let ready = store.get_pending_ready(10).await.unwrap();
        assert!(ready.is_empty(), "backoff(1) = 2s has not elapsed yet");

        let row = store.get_webhook(&w1.id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 1);
        assert!(matches!(row.status, WebhookStatus::Pending));
    }

    #[tokio::test]
    async fn mark_delivered_is_terminal() {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store.create_endpoint(sample_endpoint("http://dest/ok")).await.unwrap();
        let w1 = store.create_webhook(&endpoint.id, &HashMap::new(), b"1", true).await.unwrap();
        store.mark_delivered(&w1.id).await.unwrap();

        let row = store.get_webhook(&w1.id).await.unwrap().unwrap();
        assert!(matches!(row.status, WebhookStatus::Delivered));
        assert_eq!(row.attempts, 1);
        assert!(row.delivered_at.is_some());

        let ready = store.get_pending_ready(10).await.unwrap();
        assert!(ready.is_empty());
    }

    #[tokio::test]
    async fn reset_for_replay_returns_terminal_row_to_pending() {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store.create_endpoint(sample_endpoint("http://dest/ok")).await.unwrap();
        let w1 = store.create_webhook(&endpoint.id, &HashMap::new(), b"1", true).await.unwrap();
        store.mark_failed_permanent(&w1.id, "404").await.unwrap();
        store.mark_notification_sent(&w1.id).await.unwrap();

        store.reset_for_replay(&w1.id).await.unwrap();
        let row = store.get_webhook(&w1.id).await.unwrap().unwrap();
        assert!(matches!(row.status, WebhookStatus::Pending));
        assert_eq!(row.attempts, 0);
        assert!(!row.notification_sent);

        let ready = store.get_pending_ready(10).await.unwrap();
        assert_eq!(ready.len(), 1);
    }

    #[tokio::test]
    async fn dead_letter_sweep_promotes_old_pending_rows() {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store.create_endpoint(sample_endpoint("http://dest/ok")).await.unwrap();
        let w1 = store.create_webhook(&endpoint.id, &HashMap::new(), b"1", true).await.unwrap();

        let promoted = store.mark_dead_letter(chrono::Duration::seconds(-1)).await.unwrap();
        assert_eq!(promoted, 1);

        let row = store.get_webhook(&w1.id).await.unwrap().unwrap();
        assert!(matches!(row.status, WebhookStatus::DeadLetter));

        let unnotified = store.get_unnotified_dead_letters(10).await.unwrap();
        assert_eq!(unnotified.len(), 1);
        store.mark_notification_sent(&w1.id).await.unwrap();
        let unnotified = store.get_unnotified_dead_letters(10).await.unwrap();
        assert!(unnotified.is_empty());
    }

    #[tokio::test]
    async fn muted_endpoint_never_becomes_ready() {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store.create_endpoint(sample_endpoint("http://dest/ok")).await.unwrap();
        store
            .update_endpoint(&endpoint.id, &endpoint.user_id, EndpointUpdate { muted: Some(true), ..Default::default() })
            .await
            .unwrap();
        store.create_webhook(&endpoint.id, &HashMap::new(), b"1", true).await.unwrap();

        let ready = store.get_pending_ready(10).await.unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn backoff_matches_spec_formula() {
        assert_eq!(backoff_seconds(0), 1);
        assert_eq!(backoff_seconds(1), 2);
        assert_eq!(backoff_seconds(5), 32);
        assert_eq!(backoff_seconds(20), 3600);
    }
}
