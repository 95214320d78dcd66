use {async_trait::async_trait, switchboard_common::Event};

/// Receives every normalized event the registry emits.
///
/// Called from the per-session event task, never with the registry lock
/// held. Implementations should return quickly; slow work belongs on a queue.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_event(&self, event: Event);
}

/// Discards events.
pub struct NoopObserver;

#[async_trait]
impl EventObserver for NoopObserver {
    async fn on_event(&self, _event: Event) {}
}
