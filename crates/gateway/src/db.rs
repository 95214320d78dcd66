use std::path::Path;

use {
    anyhow::Context,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    switchboard_config::DatabaseConfig,
    switchboard_routing::SqliteRoutingStore,
    switchboard_webhooks::SqliteWebhookStore,
    tracing::debug,
};

/// Open (creating if needed) the configured database.
pub async fn open_pool(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let path = config.resolved_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    open_pool_at(&path, config.max_connections).await
}

async fn open_pool_at(path: &Path, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    debug!(path = %path.display(), max_connections, "database opened");
    Ok(pool)
}

/// Create every table the gateway uses. Idempotent.
pub async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    SqliteRoutingStore::init(pool).await?;
    SqliteWebhookStore::init(pool).await?;
    Ok(())
}

/// Single-connection in-memory database with every schema created.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use {super::*, std::path::PathBuf};

    #[tokio::test]
    async fn test_open_pool_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("switchboard.db");
        let config = DatabaseConfig {
            path: Some(path.clone()),
            max_connections: 2,
        };

        let pool = open_pool(&config).await.unwrap();
        init_schema(&pool).await.unwrap();
        // Second run is a no-op.
        init_schema(&pool).await.unwrap();
        assert!(path.exists());

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&pool)
                .await
                .unwrap();
        for table in ["routing", "webhook_config", "delivery_log"] {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_open_pool_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();
        let config = DatabaseConfig {
            path: Some(PathBuf::from(&blocker).join("switchboard.db")),
            max_connections: 1,
        };
        assert!(open_pool(&config).await.is_err());
    }
}
