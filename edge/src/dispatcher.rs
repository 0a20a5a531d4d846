//! Dispatcher + Scheduler (component C5): polls the store for ready
//! work, routes it through the connection registry, interprets the
//! outcome, and runs the retention/dead-letter sweep.
//!
//! New code — the teacher's `play` crate never persisted or retried
//! anything — but the tick-loop-with-cancellation shape follows
//! `lib.rs::start_background_tasks`' cleanup task, and outcome
//! classification borrows the Dns/Timeout/Http split from
//! `output-worker/src/work.rs::ResponseError` before that crate was
//! trimmed, generalized to the wire's three-outcome `DeliveryOutcome`.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Duration as ChronoDuration;
use relay_protocol::EdgeMessage;
use tokio_util::sync::CancellationToken;

use crate::notify::Notifier;
use crate::registry::{DispatchOutcome, Registry};
use crate::store::Store;

pub const DISPATCH_TICK: Duration = Duration::from_millis(250);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const BATCH_LIMIT: i64 = 32;
pub const DELIVER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEAD_LETTER_AGE: ChronoDuration = ChronoDuration::days(7);
const DELIVERED_RETENTION: ChronoDuration = ChronoDuration::days(7);
const FAILED_RETENTION: ChronoDuration = ChronoDuration::days(7);
const DEAD_LETTER_RETENTION: ChronoDuration = ChronoDuration::days(14);

pub struct Dispatcher {
    store: Store,
    registry: Arc<Registry>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(store: Store, registry: Arc<Registry>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            registry,
            notifier,
        }
    }

    /// The tight dispatch loop: at most one outstanding attempt per
    /// endpoint at a time, driven entirely by `GetPendingReady`'s SQL
    /// predicate rather than an in-memory queue.
    pub async fn run_dispatch_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(DISPATCH_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(error) = self.dispatch_tick().await {
                        tracing::error!(%error, "dispatch tick failed, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    async fn dispatch_tick(&self) -> Result<(), sqlx::Error> {
        let ready = self.store.get_pending_ready(BATCH_LIMIT).await?;
        for row in ready {
            if !self.registry.is_connected(&row.webhook.endpoint_id) {
                // No attempt recorded: an offline hub must never exhaust
                // a webhook's retries.
                continue;
            }
            self.attempt_dispatch(row).await;
        }
        Ok(())
    }

    async fn attempt_dispatch(&self, row: crate::store::PendingWebhook) {
        let webhook_id = row.webhook.id.clone();

        let message = EdgeMessage::Dispatch {
            webhook_id: webhook_id.clone(),
            endpoint_id: row.webhook.endpoint_id.clone(),
            destination_url: row.destination_url.clone(),
            method: "POST".to_string(),
            headers: row.webhook.headers.clone(),
            payload: base64::engine::general_purpose::STANDARD.encode(&row.webhook.payload),
        };

        let receiver = match self.registry.dispatch(&row.webhook.endpoint_id, message, webhook_id) {
            Ok(receiver) => receiver,
            Err(_) => return,
        };

        let outcome = match tokio::time::timeout(DELIVER_TIMEOUT, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => DispatchOutcome::TransportLost,
            Err(_) => DispatchOutcome::Timeout,
        };

        self.apply_outcome(&row.webhook.id, outcome).await;
    }

    async fn apply_outcome(&self, webhook_id: &str, outcome: DispatchOutcome) {
        let result = match outcome {
            DispatchOutcome::Delivered => self.store.mark_delivered(webhook_id).await,
            DispatchOutcome::ClientError { error_message } => {
                let message = error_message.unwrap_or_else(|| "client error".to_string());
                let result = self.store.mark_failed_permanent(webhook_id, &message).await;
                if result.is_ok() {
                    if let Ok(Some(webhook)) = self.store.get_webhook(webhook_id).await {
                        self.notifier.notify_failed(&webhook).await;
                        let _ = self.store.mark_notification_sent(webhook_id).await;
                    }
                }
                result
            }
            DispatchOutcome::Transient { error_message } => {
                let message = error_message.unwrap_or_else(|| "transient failure".to_string());
                self.store.record_transient_failure(webhook_id, &message).await
            }
            DispatchOutcome::TransportLost => {
                self.store.record_transient_failure(webhook_id, "transport lost").await
            }
            DispatchOutcome::Timeout => {
                self.store.record_transient_failure(webhook_id, "timeout").await
            }
        };

        if let Err(error) = result {
            tracing::error!(webhook_id, %error, "failed to record dispatch outcome");
        }
    }

    /// Dead-letters stale pending rows, fires notifications exactly once
    /// per terminal webhook, then reclaims disk space for old rows.
    pub async fn run_sweep_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        tracing::error!(%error, "retention sweep failed");
                    }
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<(), sqlx::Error> {
        let promoted = self.store.mark_dead_letter(DEAD_LETTER_AGE).await?;
        if promoted > 0 {
            tracing::info!(promoted, "promoted stale webhooks to dead_letter");
        }

        for webhook in self.store.get_unnotified_dead_letters(BATCH_LIMIT).await? {
            self.notifier.notify_dead_letter(&webhook).await;
            self.store.mark_notification_sent(&webhook.id).await?;
        }
        for webhook in self.store.get_unnotified_failed(BATCH_LIMIT).await? {
            self.notifier.notify_failed(&webhook).await;
            self.store.mark_notification_sent(&webhook.id).await?;
        }

        self.store.delete_delivered_older_than(DELIVERED_RETENTION).await?;
        self.store.delete_failed_older_than(FAILED_RETENTION).await?;
        self.store.delete_dead_letter_older_than(DEAD_LETTER_RETENTION).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LoggingNotifier;
    use crate::store::NewEndpoint;
    use relay_protocol::ProviderType;
    use std::collections::HashMap as StdHashMap;

    async fn dispatcher_with_endpoint() -> (Dispatcher, Store, Arc<Registry>, String) {
        let store = Store::connect_in_memory().await.unwrap();
        let endpoint = store
            .create_endpoint(NewEndpoint {
                user_id: "user-1".to_string(),
                name: "test".to_string(),
                provider_type: ProviderType::Generic,
                signature_secret_encrypted: None,
                verification_config_encrypted: None,
                destination_url: "http://dest/ok".to_string(),
            })
            .await
            .unwrap();
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), Arc::new(LoggingNotifier));
        (dispatcher, store, registry, endpoint.id)
    }

    #[tokio::test]
    async fn disconnected_hub_leaves_attempts_at_zero() {
        let (dispatcher, store, _registry, endpoint_id) = dispatcher_with_endpoint().await;
        let webhook = store
            .create_webhook(&endpoint_id, &StdHashMap::new(), b"{}", true)
            .await
            .unwrap();

        dispatcher.dispatch_tick().await.unwrap();

        let row = store.get_webhook(&webhook.id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 0);
        assert!(matches!(row.status, crate::store::WebhookStatus::Pending));
    }

    #[tokio::test]
    async fn dead_letter_sweep_notifies_exactly_once() {
        let (dispatcher, store, _registry, endpoint_id) = dispatcher_with_endpoint().await;
        store
            .create_webhook(&endpoint_id, &StdHashMap::new(), b"{}", true)
            .await
            .unwrap();

        // Simulate age by dead-lettering with a negative max-age window.
        store.mark_dead_letter(ChronoDuration::seconds(-1)).await.unwrap();
        dispatcher.sweep_once().await.unwrap();
        dispatcher.sweep_once().await.unwrap();

        let unnotified = store.get_unnotified_dead_letters(10).await.unwrap();
        assert!(unnotified.is_empty());
    }
}
