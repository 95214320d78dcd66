use std::{sync::Arc, time::Instant};

use {
    sqlx::SqlitePool,
    switchboard_auth::AuthContext,
    switchboard_config::SwitchboardConfig,
    switchboard_routing::{CredentialStore, RoutingStore, SqliteRoutingStore},
    switchboard_sessions::{ClientFactory, EventObserver, SessionRegistry},
    switchboard_webhooks::{
        CachedWebhookStore, EngineSettings, SqliteWebhookStore, WebhookEngine, WebhookStore,
    },
    tracing::{debug, error, info},
};

use crate::{bridge::WebhookBridge, db};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Every long-lived component, built once at startup and shared by the
/// HTTP handlers and the shutdown path.
pub struct GatewayState {
    pub config: SwitchboardConfig,
    pub pool: SqlitePool,
    pub routing: Arc<dyn RoutingStore>,
    pub auth: Arc<AuthContext>,
    /// Validating, cached webhook store. All webhook writes go through it.
    pub webhooks: Arc<dyn WebhookStore>,
    pub engine: Arc<WebhookEngine>,
    pub registry: Arc<SessionRegistry>,
    pub version: String,
    pub started_at: Instant,
    #[cfg(feature = "prometheus")]
    pub prometheus: std::sync::OnceLock<switchboard_metrics::PrometheusHandle>,
}

impl GatewayState {
    /// Open the configured database and build the gateway on it.
    pub async fn open(
        config: SwitchboardConfig,
        factory: Arc<dyn ClientFactory>,
    ) -> anyhow::Result<Arc<Self>> {
        let pool = db::open_pool(&config.database).await?;
        Self::with_pool(config, pool, factory).await
    }

    /// Build the gateway on an existing pool. Creates schemas and starts the
    /// webhook workers; reconciliation is left to the caller.
    pub async fn with_pool(
        config: SwitchboardConfig,
        pool: SqlitePool,
        factory: Arc<dyn ClientFactory>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        db::init_schema(&pool).await?;

        let sqlite_routing = Arc::new(SqliteRoutingStore::new(pool.clone()));
        let routing: Arc<dyn RoutingStore> = sqlite_routing.clone();
        let credentials: Arc<dyn CredentialStore> = sqlite_routing;
        let auth = Arc::new(AuthContext::new(credentials, &config.auth));

        let webhooks: Arc<dyn WebhookStore> = Arc::new(CachedWebhookStore::from_config(
            Arc::new(SqliteWebhookStore::new(pool.clone())),
            &config.webhooks,
        ));
        let engine = WebhookEngine::start(
            Arc::clone(&webhooks),
            EngineSettings::from(&config.webhooks),
        )?;

        let observer: Arc<dyn EventObserver> = Arc::new(WebhookBridge::new(Arc::clone(&engine)));
        let registry = SessionRegistry::new(
            factory,
            Arc::clone(&routing),
            observer,
            &config.registry,
        );
        debug!("gateway components built");

        Ok(Arc::new(Self {
            config,
            pool,
            routing,
            auth,
            webhooks,
            engine,
            registry,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            #[cfg(feature = "prometheus")]
            prometheus: std::sync::OnceLock::new(),
        }))
    }

    /// Attach the scrape handle served on `/metrics`. Only the first call
    /// takes effect.
    #[cfg(feature = "prometheus")]
    pub fn set_prometheus(&self, handle: switchboard_metrics::PrometheusHandle) {
        let _ = self.prometheus.set(handle);
    }

    /// Reconcile persisted sessions on a background task.
    pub fn spawn_reconcile(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            match registry.reconcile().await {
                Ok(report) => info!(
                    total = report.total,
                    connected = report.connected,
                    skipped = report.skipped,
                    failed = report.failed,
                    "startup reconciliation finished"
                ),
                Err(e) => error!(error = %e, "startup reconciliation failed"),
            }
        })
    }

    /// Close every live session and drain the webhook engine. Routing
    /// records and stored credentials are kept for the next start.
    pub async fn shutdown(&self) {
        let sessions = self.registry.snapshot().await;
        let count = sessions.len();
        for handle in sessions {
            self.registry.delete(handle.key()).await;
        }
        self.engine.shutdown().await;
        info!(sessions = count, "gateway stopped");
    }
}
