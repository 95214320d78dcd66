use {async_trait::async_trait, switchboard_common::EventType};

use crate::{
    error::WebhookError,
    model::{DeliveryLog, DeliveryStatus, Webhook, WebhookUpdate},
};

/// Webhook configuration and delivery audit storage.
///
/// Every webhook operation is scoped by `(id, device_id)`: a device can only
/// see and change its own webhooks.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn create_webhook(
        &self,
        device_id: &str,
        url: &str,
        secret: &str,
        event_types: &[EventType],
    ) -> Result<Webhook, WebhookError>;

    async fn update_webhook(
        &self,
        id: &str,
        device_id: &str,
        update: &WebhookUpdate,
    ) -> Result<Webhook, WebhookError>;

    /// Returns [`WebhookError::NotFound`] if no webhook matches. Inactive
    /// webhooks are returned normally.
    async fn get_webhook(&self, id: &str, device_id: &str) -> Result<Webhook, WebhookError>;

    async fn list_webhooks(&self, device_id: &str) -> Result<Vec<Webhook>, WebhookError>;

    async fn delete_webhook(&self, id: &str, device_id: &str) -> Result<(), WebhookError>;

    /// Active webhooks for a device. This is the dispatch hot path.
    async fn active_webhooks(&self, device_id: &str) -> Result<Vec<Webhook>, WebhookError>;

    /// Append one delivery outcome.
    async fn log_delivery(
        &self,
        webhook_id: &str,
        event_type: EventType,
        status: DeliveryStatus,
        attempt_count: u32,
        last_error: Option<&str>,
    ) -> Result<DeliveryLog, WebhookError>;

    /// Most recent first.
    async fn delivery_logs(
        &self,
        webhook_id: &str,
        limit: u32,
    ) -> Result<Vec<DeliveryLog>, WebhookError>;
}
