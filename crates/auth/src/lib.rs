//! Request-auth lookups shielded by TTL caches.
//!
//! Two independent caches sit in front of the credential store: token
//! versions keyed by device id, and API-key records keyed by the key's
//! SHA-256. Every mutation made through [`AuthContext`] invalidates the
//! affected entry before returning, so TTL expiry only bounds staleness for
//! writes made elsewhere.

use std::sync::Arc;

use {
    anyhow::Result,
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::RngCore,
    secrecy::Secret,
    sha2::{Digest, Sha256},
    switchboard_common::{ExpiringCache, now_ms},
    switchboard_config::AuthConfig,
    switchboard_routing::{ApiKeyRecord, CredentialStore},
    tracing::{debug, info},
};

/// Prefix carried by every issued API key.
pub const API_KEY_PREFIX: &str = "sbk_";

pub struct AuthContext {
    store: Arc<dyn CredentialStore>,
    token_versions: ExpiringCache<String, i64>,
    api_keys: ExpiringCache<String, ApiKeyRecord>,
}

/// A freshly issued key. The raw value is only available here.
pub struct IssuedApiKey {
    pub record: ApiKeyRecord,
    pub key: Secret<String>,
}

/// Hex SHA-256 of a raw API key, as stored.
pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!("{API_KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

impl AuthContext {
    pub fn new(store: Arc<dyn CredentialStore>, config: &AuthConfig) -> Self {
        Self {
            store,
            token_versions: ExpiringCache::from_secs(config.jwt_version_cache_ttl_secs),
            api_keys: ExpiringCache::from_secs(config.api_key_cache_ttl_secs),
        }
    }

    // ── Token versions ──────────────────────────────────────────────────

    /// Current token version for a device, read through the cache.
    pub async fn token_version(&self, device_id: &str) -> Result<i64> {
        let key = device_id.to_string();
        if let Some(version) = self.token_versions.get(&key) {
            return Ok(version);
        }
        let generation = self.token_versions.generation();
        let version = self.store.token_version(device_id).await?;
        self.token_versions.set_if_generation(key, version, generation);
        Ok(version)
    }

    /// Whether a token carrying `claimed` is still current for the device.
    pub async fn verify_token_version(&self, device_id: &str, claimed: i64) -> Result<bool> {
        Ok(self.token_version(device_id).await? == claimed)
    }

    /// Invalidate every token issued to the device so far.
    pub async fn revoke_tokens(&self, device_id: &str) -> Result<i64> {
        let version = self.store.bump_token_version(device_id).await?;
        self.token_versions.invalidate(&device_id.to_string());
        info!(device_id, version, "device tokens revoked");
        Ok(version)
    }

    // ── API keys ────────────────────────────────────────────────────────

    /// Resolve a raw API key to its record. Unknown and revoked keys yield
    /// `None`.
    pub async fn authenticate_api_key(&self, raw: &str) -> Result<Option<ApiKeyRecord>> {
        let hash = hash_api_key(raw);
        let generation = self.api_keys.generation();
        let record = match self.api_keys.get(&hash) {
            Some(record) => record,
            None => match self.store.api_key_by_hash(&hash).await? {
                Some(record) => {
                    self.api_keys.set_if_generation(hash, record.clone(), generation);
                    record
                },
                None => {
                    debug!("api key not found");
                    return Ok(None);
                },
            },
        };
        Ok((!record.is_revoked()).then_some(record))
    }

    pub async fn issue_api_key(
        &self,
        device_id: &str,
        label: Option<String>,
    ) -> Result<IssuedApiKey> {
        let raw = generate_api_key();
        let record = ApiKeyRecord {
            id: uuid::Uuid::new_v4().to_string(),
            key_hash: hash_api_key(&raw),
            device_id: device_id.to_string(),
            label,
            created_at: now_ms(),
            revoked_at: None,
        };
        self.store.insert_api_key(&record).await?;
        info!(device_id, key_id = %record.id, "api key issued");
        Ok(IssuedApiKey {
            record,
            key: Secret::new(raw),
        })
    }

    /// Revoke a key owned by `device_id`. Returns false if no such key.
    pub async fn revoke_api_key(&self, id: &str, device_id: &str) -> Result<bool> {
        match self.store.revoke_api_key(id, device_id).await? {
            Some(hash) => {
                self.api_keys.invalidate(&hash);
                info!(device_id, key_id = id, "api key revoked");
                Ok(true)
            },
            None => Ok(false),
        }
    }

    pub async fn list_api_keys(&self, device_id: &str) -> Result<Vec<ApiKeyRecord>> {
        self.store.list_api_keys(device_id).await
    }
}
