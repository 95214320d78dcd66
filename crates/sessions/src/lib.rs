//! Session registry: one live protocol client per (account, device) pair.
//!
//! The registry owns every client, drives its lifecycle, keeps the routing
//! table in step with connection state and turns protocol occurrences into
//! normalized events for an [`EventObserver`].

pub mod client;
pub mod key;
pub mod observer;
pub mod reconcile;
pub mod registry;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod fake;

pub use {
    client::{
        ClientError, ClientFactory, EventReceiver, EventSender, PersistedSession, ProtocolClient,
        ProtocolEvent,
    },
    key::SessionKey,
    observer::{EventObserver, NoopObserver},
    reconcile::ReconcileReport,
    registry::{
        LogoutOutcome, RegistryError, SessionHandle, SessionRegistry, SessionState, SessionStatus,
    },
};
