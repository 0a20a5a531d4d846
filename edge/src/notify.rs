//! External notification hook for dead-lettered and permanently failed
//! webhooks. The core only depends on this trait; wiring a real channel
//! (email, Telegram, Slack) is left to the host binary, per the relay's
//! "core never owns notification transport" design.

use async_trait::async_trait;

use crate::store::Webhook;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_dead_letter(&self, webhook: &Webhook);
    async fn notify_failed(&self, webhook: &Webhook);
}

/// Default notifier: logs at `warn` level. Sufficient for self-hosted
/// deployments that tail the process log; anything richer is an external
/// collaborator per the relay's scope boundary.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_dead_letter(&self, webhook: &Webhook) {
        tracing::warn!(
            webhook_id = %webhook.id,
            endpoint_id = %webhook.endpoint_id,
            received_at = %webhook.received_at,
            "webhook dead-lettered without successful delivery"
        );
    }

    async fn notify_failed(&self, webhook: &Webhook) {
        tracing::warn!(
            webhook_id = %webhook.id,
            endpoint_id = %webhook.endpoint_id,
            error = webhook.error_message.as_deref().unwrap_or(""),
            "webhook delivery failed permanently"
        );
    }
}
