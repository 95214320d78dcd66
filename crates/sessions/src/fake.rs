//! In-memory protocol client and test harness.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    switchboard_common::Event,
    switchboard_config::RegistryConfig,
    switchboard_routing::SqliteRoutingStore,
};

use crate::{
    client::{
        ClientError, ClientFactory, EventSender, PersistedSession, ProtocolClient, ProtocolEvent,
    },
    key::SessionKey,
    observer::EventObserver,
    registry::SessionRegistry,
};

#[derive(Debug, Clone, Copy, Default)]
pub enum LogoutMode {
    #[default]
    Ok,
    Fail,
    Hang,
}

pub struct FakeClient {
    identity: Mutex<Option<String>>,
    events: EventSender,
    logout_mode: LogoutMode,
    fail_connect: bool,
    connected: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub credentials_cleared: AtomicBool,
}

impl FakeClient {
    /// Emit an event on this client's own channel.
    pub fn push(&self, event: ProtocolEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(ClientError::Transport("connection refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(ProtocolEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.identity().is_some()
    }

    fn identity(&self) -> Option<String> {
        self.identity.lock().unwrap().clone()
    }

    async fn logout(&self) -> Result<(), ClientError> {
        match self.logout_mode {
            LogoutMode::Ok => Ok(()),
            LogoutMode::Fail => Err(ClientError::Rejected("not logged in".into())),
            LogoutMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            },
        }
    }

    async fn clear_credentials(&self) -> Result<(), ClientError> {
        self.credentials_cleared.store(true, Ordering::SeqCst);
        *self.identity.lock().unwrap() = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub persisted: Vec<PersistedSession>,
    pub logout_mode: LogoutMode,
    pub failing_connects: Vec<String>,
    pub creates: AtomicUsize,
    pub clients: Mutex<HashMap<SessionKey, Arc<FakeClient>>>,
}

impl FakeFactory {
    pub fn client(&self, key: &SessionKey) -> Arc<FakeClient> {
        Arc::clone(&self.clients.lock().unwrap()[key])
    }

    /// Inject an event as if the client had received it.
    pub fn send(&self, key: &SessionKey, event: ProtocolEvent) {
        self.client(key).events.send(event).unwrap();
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn create(
        &self,
        key: &SessionKey,
        identity: Option<&str>,
        events: EventSender,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let client = Arc::new(FakeClient {
            identity: Mutex::new(identity.map(str::to_string)),
            events,
            logout_mode: self.logout_mode,
            fail_connect: self.failing_connects.contains(&key.device_id),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            credentials_cleared: AtomicBool::new(false),
        });
        self.clients
            .lock()
            .unwrap()
            .insert(key.clone(), Arc::clone(&client));
        Ok(client)
    }

    async fn persisted_sessions(&self) -> Result<Vec<PersistedSession>, ClientError> {
        Ok(self.persisted.clone())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    /// Wait until at least `n` events arrived and return them.
    pub async fn wait_for(&self, n: usize) -> Vec<Event> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let events = self.events.lock().unwrap();
                    if events.len() >= n {
                        return events.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }
}

#[async_trait]
impl EventObserver for RecordingObserver {
    async fn on_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct TestEnv {
    pub registry: Arc<SessionRegistry>,
    pub factory: Arc<FakeFactory>,
    pub routing: Arc<SqliteRoutingStore>,
    pub observer: Arc<RecordingObserver>,
}

impl TestEnv {
    pub async fn new(factory: FakeFactory) -> Self {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteRoutingStore::init(&pool).await.unwrap();

        let factory = Arc::new(factory);
        let routing = Arc::new(SqliteRoutingStore::new(pool));
        let observer = Arc::new(RecordingObserver::default());
        let config = RegistryConfig {
            logout_timeout_secs: 1,
            connect_timeout_secs: 5,
            reconcile_concurrency: 2,
        };
        let registry = SessionRegistry::new(
            Arc::clone(&factory) as Arc<dyn ClientFactory>,
            Arc::clone(&routing) as _,
            Arc::clone(&observer) as _,
            &config,
        );
        Self {
            registry,
            factory,
            routing,
            observer,
        }
    }
}
