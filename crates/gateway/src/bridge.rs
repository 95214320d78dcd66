use std::sync::Arc;

use {
    async_trait::async_trait,
    switchboard_common::Event,
    switchboard_sessions::EventObserver,
    switchboard_webhooks::WebhookEngine,
};

/// Forwards registry events to the webhook engine.
///
/// `dispatch` only reads the (cached) webhook list and enqueues, so the
/// session event task is never held up by delivery.
pub struct WebhookBridge {
    engine: Arc<WebhookEngine>,
}

impl WebhookBridge {
    pub fn new(engine: Arc<WebhookEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventObserver for WebhookBridge {
    async fn on_event(&self, event: Event) {
        self.engine.dispatch(&event).await;
    }
}
