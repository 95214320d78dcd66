/// Config schema types (server, database, webhooks, auth caches, registry).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub webhooks: WebhooksConfig,
    pub auth: AuthConfig,
    pub registry: RegistryConfig,
}

/// HTTP listener for health and metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. Defaults to `~/.switchboard/switchboard.db`.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 8,
        }
    }
}

impl DatabaseConfig {
    /// The configured path, or the default under the data directory.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("switchboard.db"))
    }
}

/// Webhook delivery engine and store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    /// When false, dispatch is a no-op and no workers are started.
    pub enabled: bool,
    pub workers: usize,
    /// Maximum delivery attempts per task.
    pub retry_limit: u32,
    /// Attempt `n` is followed by a sleep of `n * retry_base_delay_secs`.
    pub retry_base_delay_secs: u64,
    /// Advisory cap on webhooks per device; exceeding it only logs a warning.
    pub max_per_device: usize,
    /// TTL of the active-webhooks cache. 0 disables caching.
    pub cache_ttl_secs: u64,
    pub queue_capacity: usize,
    pub request_timeout_secs: u64,
    pub egress: EgressConfig,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 4,
            retry_limit: 3,
            retry_base_delay_secs: 2,
            max_per_device: 5,
            cache_ttl_secs: 15,
            queue_capacity: 1000,
            request_timeout_secs: 10,
            egress: EgressConfig::default(),
        }
    }
}

impl WebhooksConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Relaxations of the webhook egress check. Both default to off and exist
/// for local development only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    pub allow_http: bool,
    pub allow_private_targets: bool,
}

/// TTLs for the auth context caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token-version lookups. Kept short so revocations show up quickly.
    pub jwt_version_cache_ttl_secs: u64,
    pub api_key_cache_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_version_cache_ttl_secs: 10,
            api_key_cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub logout_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Devices reconnected in parallel during startup reconciliation.
    pub reconcile_concurrency: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            logout_timeout_secs: 30,
            connect_timeout_secs: 30,
            reconcile_concurrency: 8,
        }
    }
}

// ── Validation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("webhooks.{field} must be at least 1 when the engine is enabled")]
    WebhookSetting { field: &'static str },
    #[error("database.path must not be empty")]
    EmptyDatabasePath,
    #[error("database.max_connections must be at least 1")]
    NoDatabaseConnections,
}

impl SwitchboardConfig {
    /// Check settings the gateway cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.webhooks;
        if w.enabled {
            if w.workers == 0 {
                return Err(ConfigError::WebhookSetting { field: "workers" });
            }
            if w.retry_limit == 0 {
                return Err(ConfigError::WebhookSetting {
                    field: "retry_limit",
                });
            }
            if w.queue_capacity == 0 {
                return Err(ConfigError::WebhookSetting {
                    field: "queue_capacity",
                });
            }
        }
        if self
            .database
            .path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::NoDatabaseConnections);
        }
        Ok(())
    }
}
