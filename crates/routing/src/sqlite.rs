use {
    anyhow::Result,
    async_trait::async_trait,
    switchboard_common::{mask_identifier, now_ms},
    tokio::sync::Mutex,
    tracing::{debug, info},
};

use crate::{
    credentials::{ApiKeyRecord, CredentialStore},
    store::{RoutingRecord, RoutingStore},
};

/// SQLite-backed routing table and credential store.
pub struct SqliteRoutingStore {
    pool: sqlx::SqlitePool,
    /// Serializes account reassignment within this process; the partial
    /// unique index backs it up across processes.
    activation: Mutex<()>,
}

impl SqliteRoutingStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool,
            activation: Mutex::new(()),
        }
    }

    /// Create the `routing`, `device_tokens` and `api_keys` tables.
    pub async fn init(pool: &sqlx::SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS routing (
                device_id           TEXT PRIMARY KEY,
                external_account_id TEXT,
                is_active           INTEGER NOT NULL DEFAULT 0,
                last_login_at       INTEGER,
                created_at          INTEGER NOT NULL,
                updated_at          INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_routing_active_account
               ON routing(external_account_id)
               WHERE is_active = 1 AND external_account_id IS NOT NULL"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS device_tokens (
                device_id     TEXT PRIMARY KEY,
                token_version INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS api_keys (
                id         TEXT PRIMARY KEY,
                key_hash   TEXT NOT NULL UNIQUE,
                device_id  TEXT NOT NULL,
                label      TEXT,
                created_at INTEGER NOT NULL,
                revoked_at INTEGER
            )"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RoutingStore for SqliteRoutingStore {
    async fn provision(&self, device_id: &str) -> Result<RoutingRecord> {
        let now = now_ms();
        sqlx::query(
            r#"INSERT INTO routing (device_id, is_active, created_at, updated_at)
               VALUES (?, 0, ?, ?)
               ON CONFLICT(device_id) DO NOTHING"#,
        )
        .bind(device_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get(device_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("routing record for {device_id} vanished after insert"))
    }

    async fn get(&self, device_id: &str) -> Result<Option<RoutingRecord>> {
        Ok(
            sqlx::query_as::<_, RoutingRecord>("SELECT * FROM routing WHERE device_id = ?")
                .bind(device_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn link(&self, device_id: &str, external_account_id: &str) -> Result<RoutingRecord> {
        let now = now_ms();
        sqlx::query(
            r#"INSERT INTO routing
                 (device_id, external_account_id, is_active, created_at, updated_at)
               VALUES (?, ?, 0, ?, ?)
               ON CONFLICT(device_id) DO UPDATE SET
                 is_active = CASE
                   WHEN routing.external_account_id = excluded.external_account_id
                   THEN routing.is_active ELSE 0 END,
                 external_account_id = excluded.external_account_id,
                 updated_at = excluded.updated_at"#,
        )
        .bind(device_id)
        .bind(external_account_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get(device_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("routing record for {device_id} vanished after link"))
    }

    async fn activate(&self, device_id: &str, external_account_id: &str) -> Result<RoutingRecord> {
        let _guard = self.activation.lock().await;
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let displaced = sqlx::query(
            r#"UPDATE routing
               SET is_active = 0, external_account_id = NULL, updated_at = ?
               WHERE external_account_id = ? AND device_id != ?"#,
        )
        .bind(now)
        .bind(external_account_id)
        .bind(device_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"INSERT INTO routing
                 (device_id, external_account_id, is_active, last_login_at, created_at, updated_at)
               VALUES (?, ?, 1, ?, ?, ?)
               ON CONFLICT(device_id) DO UPDATE SET
                 external_account_id = excluded.external_account_id,
                 is_active = 1,
                 last_login_at = excluded.last_login_at,
                 updated_at = excluded.updated_at"#,
        )
        .bind(device_id)
        .bind(external_account_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let record = sqlx::query_as::<_, RoutingRecord>("SELECT * FROM routing WHERE device_id = ?")
            .bind(device_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        if displaced > 0 {
            info!(
                device_id,
                account = %mask_identifier(external_account_id),
                displaced,
                "account reassigned to device"
            );
        }
        Ok(record)
    }

    async fn deactivate(&self, device_id: &str) -> Result<bool> {
        let rows = sqlx::query(
            r#"UPDATE routing
               SET is_active = 0, external_account_id = NULL, updated_at = ?
               WHERE device_id = ?"#,
        )
        .bind(now_ms())
        .bind(device_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn remove(&self, device_id: &str) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM routing WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        debug!(device_id, removed = rows > 0, "routing record removed");
        Ok(rows > 0)
    }

    async fn find_active_by_account(
        &self,
        external_account_id: &str,
    ) -> Result<Option<RoutingRecord>> {
        Ok(sqlx::query_as::<_, RoutingRecord>(
            "SELECT * FROM routing WHERE external_account_id = ? AND is_active = 1",
        )
        .bind(external_account_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list(&self) -> Result<Vec<RoutingRecord>> {
        Ok(
            sqlx::query_as::<_, RoutingRecord>("SELECT * FROM routing ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn mark_all_inactive(&self) -> Result<u64> {
        Ok(
            sqlx::query("UPDATE routing SET is_active = 0, updated_at = ? WHERE is_active = 1")
                .bind(now_ms())
                .execute(&self.pool)
                .await?
                .rows_affected(),
        )
    }
}

#[async_trait]
impl CredentialStore for SqliteRoutingStore {
    async fn token_version(&self, device_id: &str) -> Result<i64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT token_version FROM device_tokens WHERE device_id = ?")
                .bind(device_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.unwrap_or(1))
    }

    async fn bump_token_version(&self, device_id: &str) -> Result<i64> {
        let version: i64 = sqlx::query_scalar(
            r#"INSERT INTO device_tokens (device_id, token_version, updated_at)
               VALUES (?, 2, ?)
               ON CONFLICT(device_id) DO UPDATE SET
                 token_version = device_tokens.token_version + 1,
                 updated_at = excluded.updated_at
               RETURNING token_version"#,
        )
        .bind(device_id)
        .bind(now_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    async fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO api_keys (id, key_hash, device_id, label, created_at, revoked_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.id)
        .bind(&record.key_hash)
        .bind(&record.device_id)
        .bind(&record.label)
        .bind(record.created_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
        Ok(
            sqlx::query_as::<_, ApiKeyRecord>("SELECT * FROM api_keys WHERE key_hash = ?")
                .bind(key_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn revoke_api_key(&self, id: &str, device_id: &str) -> Result<Option<String>> {
        Ok(sqlx::query_scalar(
            r#"UPDATE api_keys SET revoked_at = COALESCE(revoked_at, ?)
               WHERE id = ? AND device_id = ?
               RETURNING key_hash"#,
        )
        .bind(now_ms())
        .bind(id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_api_keys(&self, device_id: &str) -> Result<Vec<ApiKeyRecord>> {
        Ok(sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT * FROM api_keys WHERE device_id = ? ORDER BY created_at ASC",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn store() -> SqliteRoutingStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteRoutingStore::init(&pool).await.unwrap();
        SqliteRoutingStore::new(pool)
    }

    #[tokio::test]
    async fn test_provision_creates_inactive_record() {
        let store = store().await;
        let rec = store.provision("dev-1").await.unwrap();
        assert_eq!(rec.device_id, "dev-1");
        assert!(rec.external_account_id.is_none());
        assert!(!rec.is_active);

        // Idempotent.
        store.activate("dev-1", "acct-1").await.unwrap();
        let again = store.provision("dev-1").await.unwrap();
        assert_eq!(again.external_account_id.as_deref(), Some("acct-1"));
    }

    #[tokio::test]
    async fn test_link_does_not_activate() {
        let store = store().await;
        let rec = store.link("dev-1", "acct-1").await.unwrap();
        assert!(!rec.is_active);
        assert_eq!(rec.external_account_id.as_deref(), Some("acct-1"));

        store.activate("dev-1", "acct-1").await.unwrap();
        assert!(store.link("dev-1", "acct-1").await.unwrap().is_active);

        // Re-pairing to another account drops the active flag.
        let rec = store.link("dev-1", "acct-2").await.unwrap();
        assert!(!rec.is_active);
        assert!(store.find_active_by_account("acct-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activate_sets_login() {
        let store = store().await;
        let rec = store.activate("dev-1", "acct-1").await.unwrap();
        assert!(rec.is_active);
        assert_eq!(rec.external_account_id.as_deref(), Some("acct-1"));
        assert!(rec.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_activate_reassigns_account() {
        let store = store().await;
        store.activate("dev-1", "acct-1").await.unwrap();
        store.activate("dev-2", "acct-1").await.unwrap();

        let old = store.get("dev-1").await.unwrap().unwrap();
        assert!(!old.is_active);
        assert!(old.external_account_id.is_none());

        let owner = store.find_active_by_account("acct-1").await.unwrap().unwrap();
        assert_eq!(owner.device_id, "dev-2");
    }

    #[tokio::test]
    async fn test_concurrent_activation_keeps_one_active() {
        let store = Arc::new(store().await);
        let tasks = (0..8).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.activate(&format!("dev-{i}"), "acct-shared").await })
        });
        for res in futures::future::join_all(tasks).await {
            res.unwrap().unwrap();
        }

        let active: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_active && r.external_account_id.as_deref() == Some("acct-shared"))
            .collect();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_and_remove() {
        let store = store().await;
        store.activate("dev-1", "acct-1").await.unwrap();

        assert!(store.deactivate("dev-1").await.unwrap());
        let rec = store.get("dev-1").await.unwrap().unwrap();
        assert!(!rec.is_active);
        assert!(rec.external_account_id.is_none());

        assert!(store.remove("dev-1").await.unwrap());
        assert!(!store.remove("dev-1").await.unwrap());
        assert!(store.get("dev-1").await.unwrap().is_none());
        assert!(!store.deactivate("dev-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_all_inactive_keeps_accounts() {
        let store = store().await;
        store.activate("dev-1", "acct-1").await.unwrap();
        store.activate("dev-2", "acct-2").await.unwrap();

        assert_eq!(store.mark_all_inactive().await.unwrap(), 2);
        let rec = store.get("dev-1").await.unwrap().unwrap();
        assert!(!rec.is_active);
        assert_eq!(rec.external_account_id.as_deref(), Some("acct-1"));

        // Reactivation after a restart is allowed.
        store.activate("dev-1", "acct-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_token_version_bump() {
        let store = store().await;
        assert_eq!(store.token_version("dev-1").await.unwrap(), 1);
        assert_eq!(store.bump_token_version("dev-1").await.unwrap(), 2);
        assert_eq!(store.bump_token_version("dev-1").await.unwrap(), 3);
        assert_eq!(store.token_version("dev-1").await.unwrap(), 3);
        assert_eq!(store.token_version("dev-2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_api_key_lifecycle() {
        let store = store().await;
        let record = ApiKeyRecord {
            id: "key-1".into(),
            key_hash: "abc123".into(),
            device_id: "dev-1".into(),
            label: Some("ci".into()),
            created_at: now_ms(),
            revoked_at: None,
        };
        store.insert_api_key(&record).await.unwrap();
        assert_eq!(store.api_key_by_hash("abc123").await.unwrap(), Some(record));

        // Another tenant cannot revoke it.
        assert!(store.revoke_api_key("key-1", "dev-2").await.unwrap().is_none());

        let hash = store.revoke_api_key("key-1", "dev-1").await.unwrap();
        assert_eq!(hash.as_deref(), Some("abc123"));
        let revoked = store.api_key_by_hash("abc123").await.unwrap().unwrap();
        assert!(revoked.is_revoked());
        assert_eq!(store.list_api_keys("dev-1").await.unwrap().len(), 1);
    }
}
