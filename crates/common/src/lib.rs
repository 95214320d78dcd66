//! Shared building blocks: the expiring cache used by every TTL cache in the
//! gateway, the normalized event vocabulary, and log-safety helpers.

pub mod cache;
pub mod event;
pub mod mask;

use std::time::{SystemTime, UNIX_EPOCH};

pub use {
    cache::ExpiringCache,
    event::{Event, EventType, UnknownEventType},
    mask::mask_identifier,
};

/// Milliseconds since the Unix epoch, as stored in every timestamp column.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
