use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    switchboard_common::{EventType, ExpiringCache},
    switchboard_config::WebhooksConfig,
    tracing::{debug, warn},
};

use crate::{
    egress::EgressPolicy,
    error::WebhookError,
    model::{DeliveryLog, DeliveryStatus, Webhook, WebhookUpdate},
    store::WebhookStore,
};

/// Validating, caching front for a [`WebhookStore`].
///
/// Writes are checked against the egress policy before they reach the
/// store. `active_webhooks` is served from a per-device TTL cache that every
/// successful write invalidates before returning.
pub struct CachedWebhookStore {
    inner: Arc<dyn WebhookStore>,
    active: ExpiringCache<String, Vec<Webhook>>,
    egress: EgressPolicy,
    max_per_device: usize,
}

impl CachedWebhookStore {
    pub fn new(
        inner: Arc<dyn WebhookStore>,
        ttl: Duration,
        egress: EgressPolicy,
        max_per_device: usize,
    ) -> Self {
        Self {
            inner,
            active: ExpiringCache::new(ttl),
            egress,
            max_per_device,
        }
    }

    pub fn from_config(inner: Arc<dyn WebhookStore>, config: &WebhooksConfig) -> Self {
        Self::new(
            inner,
            Duration::from_secs(config.cache_ttl_secs),
            EgressPolicy::from(&config.egress),
            config.max_per_device,
        )
    }

    fn validate_url(&self, url: &str) -> Result<(), WebhookError> {
        if url.trim().is_empty() {
            return Err(WebhookError::InvalidUrl("url must not be empty".into()));
        }
        self.egress.check(url)?;
        Ok(())
    }

    fn invalidate(&self, device_id: &str) {
        self.active.invalidate(&device_id.to_string());
    }
}

#[async_trait]
impl WebhookStore for CachedWebhookStore {
    async fn create_webhook(
        &self,
        device_id: &str,
        url: &str,
        secret: &str,
        event_types: &[EventType],
    ) -> Result<Webhook, WebhookError> {
        self.validate_url(url)?;
        let webhook = self
            .inner
            .create_webhook(device_id, url, secret, event_types)
            .await?;
        self.invalidate(device_id);

        match self.inner.list_webhooks(device_id).await {
            Ok(all) if all.len() > self.max_per_device => warn!(
                device_id,
                count = all.len(),
                max = self.max_per_device,
                "device exceeds advisory webhook limit"
            ),
            Ok(_) => {},
            Err(e) => debug!(device_id, error = %e, "could not count webhooks"),
        }
        Ok(webhook)
    }

    async fn update_webhook(
        &self,
        id: &str,
        device_id: &str,
        update: &WebhookUpdate,
    ) -> Result<Webhook, WebhookError> {
        self.validate_url(&update.url)?;
        let webhook = self.inner.update_webhook(id, device_id, update).await?;
        self.invalidate(device_id);
        Ok(webhook)
    }

    async fn get_webhook(&self, id: &str, device_id: &str) -> Result<Webhook, WebhookError> {
        self.inner.get_webhook(id, device_id).await
    }

    async fn list_webhooks(&self, device_id: &str) -> Result<Vec<Webhook>, WebhookError> {
        self.inner.list_webhooks(device_id).await
    }

    async fn delete_webhook(&self, id: &str, device_id: &str) -> Result<(), WebhookError> {
        self.inner.delete_webhook(id, device_id).await?;
        self.invalidate(device_id);
        Ok(())
    }

    async fn active_webhooks(&self, device_id: &str) -> Result<Vec<Webhook>, WebhookError> {
        let key = device_id.to_string();
        if let Some(hit) = self.active.get(&key) {
            return Ok(hit);
        }
        let generation = self.active.generation();
        let webhooks = self.inner.active_webhooks(device_id).await?;
        if !self.active.set_if_generation(key, webhooks.clone(), generation) {
            debug!(device_id, "webhooks changed during load, not caching");
        }
        Ok(webhooks)
    }

    async fn log_delivery(
        &self,
        webhook_id: &str,
        event_type: EventType,
        status: DeliveryStatus,
        attempt_count: u32,
        last_error: Option<&str>,
    ) -> Result<DeliveryLog, WebhookError> {
        self.inner
            .log_delivery(webhook_id, event_type, status, attempt_count, last_error)
            .await
    }

    async fn delivery_logs(
        &self,
        webhook_id: &str,
        limit: u32,
    ) -> Result<Vec<DeliveryLog>, WebhookError> {
        self.inner.delivery_logs(webhook_id, limit).await
    }
}
