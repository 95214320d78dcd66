use {anyhow::Result, async_trait::async_trait, serde::Serialize};

/// Persisted mapping from an internal device id to the external account it
/// is currently linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RoutingRecord {
    pub device_id: String,
    pub external_account_id: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Routing table access.
///
/// At most one active record may reference a given external account id;
/// `activate` reassigns the account to the calling device (last writer wins).
#[async_trait]
pub trait RoutingStore: Send + Sync {
    /// Create an inactive record with no account for a new device. No-op if
    /// the device already has a record.
    async fn provision(&self, device_id: &str) -> Result<RoutingRecord>;

    async fn get(&self, device_id: &str) -> Result<Option<RoutingRecord>>;

    /// Record the account a device is paired with without activating it. A
    /// record that was active for a different account is deactivated.
    async fn link(&self, device_id: &str, external_account_id: &str) -> Result<RoutingRecord>;

    /// Link `device_id` to `external_account_id` and mark it active,
    /// deactivating any other record holding the same account.
    async fn activate(&self, device_id: &str, external_account_id: &str) -> Result<RoutingRecord>;

    /// Clear the account link and mark inactive. Returns false if the device
    /// has no record.
    async fn deactivate(&self, device_id: &str) -> Result<bool>;

    /// Delete the record. Returns false if there was none.
    async fn remove(&self, device_id: &str) -> Result<bool>;

    async fn find_active_by_account(
        &self,
        external_account_id: &str,
    ) -> Result<Option<RoutingRecord>>;

    async fn list(&self) -> Result<Vec<RoutingRecord>>;

    /// Mark every record inactive without touching account links. Used at
    /// startup, before live connections re-activate their records.
    async fn mark_all_inactive(&self) -> Result<u64>;
}
