//! Boundary to the protocol client library.
//!
//! The registry never talks to a transport directly. A [`ClientFactory`]
//! builds one [`ProtocolClient`] per session and hands it an
//! [`EventSender`] through which the client reports what happened on the
//! wire.

use std::sync::Arc;

use {async_trait::async_trait, serde_json::Value, tokio::sync::mpsc};

use crate::key::SessionKey;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("credential storage: {0}")]
    Credentials(String),
}

/// What a protocol client can report. Transport-level occurrences drive the
/// session lifecycle; the rest are forwarded as normalized events.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Connected,
    Disconnected { reason: Option<String> },
    /// The remote side ended the session (unlinked from the phone, banned,
    /// credentials expired).
    LoggedOut { reason: String },
    /// Another connection with the same credentials took over.
    StreamReplaced,
    PairSuccess { external_id: String },
    Message { from: String, data: Value },
    Receipt { from: String, data: Value },
    CallOffer { from: String, data: Value },
    Presence { from: String, data: Value },
}

pub type EventSender = mpsc::UnboundedSender<ProtocolEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ProtocolEvent>;

/// One live protocol client. Implementations must be cheap to query:
/// `is_connected`, `is_logged_in` and `identity` are called while building
/// status snapshots.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn connect(&self) -> Result<(), ClientError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    /// External account id, known once pairing has completed.
    fn identity(&self) -> Option<String>;

    /// Protocol-level logout. The registry bounds this with a timeout.
    async fn logout(&self) -> Result<(), ClientError>;

    /// Drop locally stored credentials without telling the remote side.
    async fn clear_credentials(&self) -> Result<(), ClientError>;
}

/// A session the client library has credentials for, as found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub key: SessionKey,
    pub identity: Option<String>,
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build a client for `key`. Called with the registry's write lock held,
    /// so it must not perform network I/O.
    async fn create(
        &self,
        key: &SessionKey,
        identity: Option<&str>,
        events: EventSender,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError>;

    /// Every session with stored credentials.
    async fn persisted_sessions(&self) -> Result<Vec<PersistedSession>, ClientError>;
}
