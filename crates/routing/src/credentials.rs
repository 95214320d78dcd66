use {anyhow::Result, async_trait::async_trait, serde::Serialize};

/// An API key as persisted. The raw key is never stored, only its SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ApiKeyRecord {
    pub id: String,
    #[serde(skip)]
    pub key_hash: String,
    pub device_id: String,
    pub label: Option<String>,
    pub created_at: i64,
    pub revoked_at: Option<i64>,
}

impl ApiKeyRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Per-device token versions and API-key records backing request auth.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current token version. Devices that never revoked start at 1.
    async fn token_version(&self, device_id: &str) -> Result<i64>;

    /// Increment the token version, invalidating every token issued before.
    async fn bump_token_version(&self, device_id: &str) -> Result<i64>;

    async fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<()>;

    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>>;

    /// Revoke a key owned by `device_id`. Returns the revoked key's hash, or
    /// `None` if no such key exists for that device.
    async fn revoke_api_key(&self, id: &str, device_id: &str) -> Result<Option<String>>;

    async fn list_api_keys(&self, device_id: &str) -> Result<Vec<ApiKeyRecord>>;
}
