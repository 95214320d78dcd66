use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use {
    serde::Serialize,
    serde_json::{Value, json},
    switchboard_common::{Event, EventType, mask_identifier},
    switchboard_config::RegistryConfig,
    switchboard_routing::RoutingStore,
    tokio::sync::{RwLock, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, gauge, sessions as session_metrics};

use crate::{
    client::{ClientError, ClientFactory, EventReceiver, ProtocolClient, ProtocolEvent},
    key::SessionKey,
    observer::EventObserver,
};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session {0} is not initialized")]
    NotInitialized(SessionKey),
    #[error("session {0} has never completed pairing")]
    NoIdentity(SessionKey),
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("routing store: {0:#}")]
    Routing(anyhow::Error),
}

// ── Handles ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
    /// Logged out or replaced. Terminal.
    Terminated,
}

/// The registry's entry for one session. Owns the protocol client.
pub struct SessionHandle {
    key: SessionKey,
    client: Arc<dyn ProtocolClient>,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Terminated {
            *state = next;
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            account_id: self.key.account_id.clone(),
            device_id: self.key.device_id.clone(),
            state: self.state(),
            connected: self.client.is_connected(),
            logged_in: self.client.is_logged_in(),
            identity: self.client.identity().map(|id| mask_identifier(&id)),
        }
    }
}

/// Point-in-time view of a session, safe to log or return to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub account_id: String,
    pub device_id: String,
    pub state: SessionState,
    pub connected: bool,
    pub logged_in: bool,
    /// Masked external account id.
    pub identity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutOutcome {
    /// The remote side acknowledged the logout.
    Graceful,
    /// Logout failed or timed out; local credentials were cleared instead.
    Forced,
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Owns every live protocol client, one per [`SessionKey`].
///
/// The map is guarded by a single reader/writer lock. Transport calls and
/// caller-supplied callbacks always run after the lock is released.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Arc<SessionHandle>>>,
    factory: Arc<dyn ClientFactory>,
    routing: Arc<dyn RoutingStore>,
    observer: Arc<dyn EventObserver>,
    pub(crate) logout_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) reconcile_concurrency: usize,
    this: Weak<SessionRegistry>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        routing: Arc<dyn RoutingStore>,
        observer: Arc<dyn EventObserver>,
        config: &RegistryConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            routing,
            observer,
            logout_timeout: Duration::from_secs(config.logout_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            reconcile_concurrency: config.reconcile_concurrency.max(1),
            this: this.clone(),
        })
    }

    pub(crate) fn routing(&self) -> &Arc<dyn RoutingStore> {
        &self.routing
    }

    pub(crate) fn factory(&self) -> &Arc<dyn ClientFactory> {
        &self.factory
    }

    /// Register a client for `key` unless one already exists.
    ///
    /// `identity` is the external account id from a previous pairing, if
    /// any. When the new client knows its identity the routing record is
    /// linked to it.
    pub async fn init(
        &self,
        key: SessionKey,
        identity: Option<String>,
    ) -> Result<Arc<SessionHandle>, RegistryError> {
        let handle = {
            let mut sessions = self.sessions.write().await;
            if let Some(existing) = sessions.get(&key) {
                debug!(session = %key, "session already initialized");
                return Ok(Arc::clone(existing));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let client = self.factory.create(&key, identity.as_deref(), tx).await?;
            let handle = Arc::new(SessionHandle {
                key: key.clone(),
                client,
                state: Mutex::new(SessionState::Uninitialized),
                cancel: CancellationToken::new(),
            });
            self.spawn_event_task(&handle, rx);
            sessions.insert(key.clone(), Arc::clone(&handle));
            record_active(sessions.len());
            handle
        };

        info!(session = %key, "session initialized");
        if let Some(external_id) = handle.client.identity() {
            self.routing
                .link(&key.device_id, &external_id)
                .await
                .map_err(RegistryError::Routing)?;
        }
        Ok(handle)
    }

    /// Drop any transport connection and connect again.
    pub async fn connect(&self, key: &SessionKey) -> Result<(), RegistryError> {
        let handle = self
            .get(key)
            .await
            .ok_or_else(|| RegistryError::NotInitialized(key.clone()))?;
        if handle.client.identity().is_none() {
            return Err(RegistryError::NoIdentity(key.clone()));
        }
        if handle.client.is_connected() {
            handle.client.disconnect().await;
        }

        handle.set_state(SessionState::Connecting);
        match tokio::time::timeout(self.connect_timeout, handle.client.connect()).await {
            Ok(Ok(())) => {
                handle.set_state(SessionState::Connected);
                debug!(session = %key, "connect returned");
                Ok(())
            },
            Ok(Err(e)) => {
                handle.set_state(SessionState::Disconnected);
                Err(e.into())
            },
            Err(_) => {
                handle.set_state(SessionState::Disconnected);
                Err(RegistryError::Timeout {
                    op: "connect",
                    after: self.connect_timeout,
                })
            },
        }
    }

    /// Log the session out and forget it.
    ///
    /// A graceful protocol logout is attempted first; if it fails or times
    /// out the client's stored credentials are cleared locally. Either way
    /// the handle and the routing record are removed.
    pub async fn logout(&self, key: &SessionKey) -> Result<LogoutOutcome, RegistryError> {
        let handle = self
            .get(key)
            .await
            .ok_or_else(|| RegistryError::NotInitialized(key.clone()))?;

        let graceful = tokio::time::timeout(self.logout_timeout, handle.client.logout());
        let outcome = match graceful.await {
            Ok(Ok(())) => LogoutOutcome::Graceful,
            Ok(Err(e)) => {
                warn!(session = %key, error = %e, "graceful logout failed, clearing credentials");
                LogoutOutcome::Forced
            },
            Err(_) => {
                warn!(
                    session = %key,
                    timeout_secs = self.logout_timeout.as_secs(),
                    "logout timed out, clearing credentials"
                );
                LogoutOutcome::Forced
            },
        };
        if outcome == LogoutOutcome::Forced
            && let Err(e) = handle.client.clear_credentials().await
        {
            error!(session = %key, error = %e, "failed to clear credentials");
        }

        self.remove_handle(&handle).await;
        self.routing
            .remove(&key.device_id)
            .await
            .map_err(RegistryError::Routing)?;
        info!(session = %key, ?outcome, "session logged out");
        Ok(outcome)
    }

    /// Remove the handle and disconnect its client. Returns false if there
    /// was nothing to remove.
    pub async fn delete(&self, key: &SessionKey) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(key);
            record_active(sessions.len());
            removed
        };
        let Some(handle) = removed else {
            return false;
        };
        Self::retire(&handle).await;
        true
    }

    /// Remove `handle` only if it is still the one registered under its key.
    async fn remove_handle(&self, handle: &Arc<SessionHandle>) -> bool {
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get(&handle.key) {
                Some(current) if Arc::ptr_eq(current, handle) => {
                    sessions.remove(&handle.key);
                    record_active(sessions.len());
                },
                _ => return false,
            }
        }
        Self::retire(handle).await;
        true
    }

    async fn retire(handle: &SessionHandle) {
        handle.cancel.cancel();
        handle.set_state(SessionState::Terminated);
        handle.client.disconnect().await;
        debug!(session = %handle.key, "session removed");
    }

    async fn is_current(&self, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .read()
            .await
            .get(&handle.key)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn status(&self, key: &SessionKey) -> Option<SessionStatus> {
        self.get(key).await.map(|h| h.status())
    }

    pub async fn statuses(&self) -> Vec<SessionStatus> {
        self.snapshot().await.iter().map(|h| h.status()).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Handles sorted by key, copied out under the read lock.
    pub async fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        let mut handles: Vec<_> = self.sessions.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.key.cmp(&b.key));
        handles
    }

    /// Call `f` for every registered session until it returns false.
    ///
    /// Works on a snapshot, so `f` may call back into the registry.
    pub async fn range<F, Fut>(&self, mut f: F)
    where
        F: FnMut(Arc<SessionHandle>) -> Fut,
        Fut: Future<Output = bool>,
    {
        for handle in self.snapshot().await {
            if !f(handle).await {
                break;
            }
        }
    }

    // ── Event handling ───────────────────────────────────────────────────────

    /// Pump the client's events for as long as `handle` is alive and not
    /// cancelled. The task holds the handle weakly so a dropped session
    /// ends it.
    fn spawn_event_task(&self, handle: &Arc<SessionHandle>, mut rx: EventReceiver) {
        let registry = self.this.clone();
        let owner = Arc::downgrade(handle);
        let cancel = handle.cancel.clone();
        let key = handle.key.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let (Some(registry), Some(owner)) = (registry.upgrade(), owner.upgrade()) else {
                    break;
                };
                registry.handle_event(&owner, event).await;
            }
            debug!(session = %key, "event task stopped");
        });
    }

    /// Apply an event from `owner`'s client. Events from a handle that has
    /// since been removed or replaced are dropped.
    async fn handle_event(&self, owner: &Arc<SessionHandle>, event: ProtocolEvent) {
        let key = &owner.key;
        if owner.cancel.is_cancelled() || !self.is_current(owner).await {
            debug!(session = %key, "dropping event from retired client");
            return;
        }
        match event {
            ProtocolEvent::Connected => {
                owner.set_state(SessionState::Connected);
                let identity = owner.client.identity();
                if let Some(external_id) = &identity {
                    self.activate_routing(key, external_id).await;
                }
                info!(session = %key, "connected");
                self.emit(key, EventType::Connected, json!({ "external_id": identity }))
                    .await;
            },
            ProtocolEvent::Disconnected { reason } => {
                owner.set_state(SessionState::Disconnected);
                info!(session = %key, reason = reason.as_deref().unwrap_or(""), "disconnected");
                self.emit(key, EventType::Disconnected, json!({ "reason": reason }))
                    .await;
            },
            ProtocolEvent::LoggedOut { reason } => {
                self.teardown_remote(owner, &reason).await;
            },
            ProtocolEvent::StreamReplaced => {
                self.teardown_remote(owner, "stream_replaced").await;
            },
            ProtocolEvent::PairSuccess { external_id } => {
                info!(
                    session = %key,
                    external_id = %mask_identifier(&external_id),
                    "pairing completed"
                );
                self.activate_routing(key, &external_id).await;
                self.emit(
                    key,
                    EventType::PairSuccess,
                    json!({ "external_id": external_id }),
                )
                .await;
            },
            ProtocolEvent::Message { from, data } => {
                self.forward(key, EventType::MessageReceived, &from, data)
                    .await;
            },
            ProtocolEvent::Receipt { from, data } => {
                self.forward(key, EventType::MessageReceipt, &from, data)
                    .await;
            },
            ProtocolEvent::CallOffer { from, data } => {
                self.forward(key, EventType::CallOffer, &from, data).await;
            },
            ProtocolEvent::Presence { from, data } => {
                self.forward(key, EventType::PresenceUpdate, &from, data)
                    .await;
            },
        }
    }

    /// The remote side ended the session: forget the handle, drop its
    /// credentials and clear the routing record.
    ///
    /// Local cleanup runs under the map's write lock so an `init` for the
    /// same key cannot slip in between. If the handle was already removed
    /// or replaced, nothing happens.
    async fn teardown_remote(&self, owner: &Arc<SessionHandle>, reason: &str) {
        let key = &owner.key;
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get(key) {
                Some(current) if Arc::ptr_eq(current, owner) => {
                    sessions.remove(key);
                    record_active(sessions.len());
                },
                _ => {
                    debug!(session = %key, reason, "session already replaced, skipping teardown");
                    return;
                },
            }
            warn!(session = %key, reason, "session ended by remote");
            if let Err(e) = owner.client.clear_credentials().await {
                error!(session = %key, error = %e, "failed to clear credentials");
            }
            if let Err(e) = self.routing.deactivate(&key.device_id).await {
                error!(session = %key, error = %e, "failed to clear routing record");
            }
        }
        Self::retire(owner).await;
        self.emit(key, EventType::LoggedOut, json!({ "reason": reason }))
            .await;
    }

    async fn activate_routing(&self, key: &SessionKey, external_id: &str) {
        if let Err(e) = self.routing.activate(&key.device_id, external_id).await {
            error!(
                session = %key,
                external_id = %mask_identifier(external_id),
                error = %e,
                "failed to activate routing record"
            );
        }
    }

    async fn forward(&self, key: &SessionKey, event_type: EventType, from: &str, data: Value) {
        debug!(
            session = %key,
            from = %mask_identifier(from),
            event = %event_type,
            "protocol event"
        );
        self.emit(key, event_type, data).await;
    }

    async fn emit(&self, key: &SessionKey, event_type: EventType, data: Value) {
        #[cfg(feature = "metrics")]
        counter!(session_metrics::EVENTS_TOTAL, "type" => event_type.as_str()).increment(1);
        self.observer
            .on_event(Event::new(event_type, key.device_id.clone(), data))
            .await;
    }
}

fn record_active(_count: usize) {
    #[cfg(feature = "metrics")]
    gauge!(session_metrics::ACTIVE).set(_count as f64);
}
