//! Device routing table: which device currently holds which external
//! account, plus the per-device credentials used by request auth.

pub mod credentials;
pub mod sqlite;
pub mod store;

pub use {
    credentials::{ApiKeyRecord, CredentialStore},
    sqlite::SqliteRoutingStore,
    store::{RoutingRecord, RoutingStore},
};
