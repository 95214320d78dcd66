//! Metric names shared across crates, plus optional Prometheus export.
//!
//! Crates record through the `metrics` facade re-exported here; nothing is
//! collected until a recorder is installed.

pub use metrics::{counter, gauge, histogram};

/// Webhook delivery engine.
pub mod webhooks {
    pub const DISPATCHED_TOTAL: &str = "switchboard_webhook_dispatched_total";
    pub const DROPPED_TOTAL: &str = "switchboard_webhook_dropped_total";
    pub const DELIVERED_TOTAL: &str = "switchboard_webhook_delivered_total";
    pub const FAILED_TOTAL: &str = "switchboard_webhook_failed_total";
    pub const ATTEMPTS_TOTAL: &str = "switchboard_webhook_attempts_total";
    pub const DELIVERY_DURATION_SECONDS: &str = "switchboard_webhook_delivery_duration_seconds";
}

/// Session registry.
pub mod sessions {
    pub const ACTIVE: &str = "switchboard_sessions_active";
    pub const EVENTS_TOTAL: &str = "switchboard_session_events_total";
}

#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus::PrometheusHandle;

/// Install the global Prometheus recorder and return a handle for rendering
/// the scrape output.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))
}
