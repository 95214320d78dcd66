//! Customer webhooks: configuration storage, a validating read-through
//! cache, and the asynchronous delivery engine.

pub mod cache;
pub mod egress;
pub mod engine;
pub mod error;
pub mod model;
pub mod signing;
pub mod sqlite;
pub mod store;

pub use {
    cache::CachedWebhookStore,
    egress::{EgressPolicy, EgressViolation},
    engine::{
        DeliveryOutcome, DeliveryTask, DispatchSummary, EngineSettings, StatsSnapshot,
        WebhookEngine,
    },
    error::WebhookError,
    model::{DeliveryLog, DeliveryStatus, Webhook, WebhookUpdate, parse_event_types},
    signing::{sign_payload, signature_header, verify_signature},
    sqlite::SqliteWebhookStore,
    store::WebhookStore,
};
