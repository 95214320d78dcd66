use {
    async_trait::async_trait,
    switchboard_common::{EventType, now_ms},
    tracing::debug,
};

use crate::{
    error::WebhookError,
    model::{DeliveryLog, DeliveryStatus, Webhook, WebhookUpdate, dedup_event_types},
    store::WebhookStore,
};

#[derive(sqlx::FromRow)]
struct WebhookRow {
    id: String,
    device_id: String,
    url: String,
    secret: String,
    event_types: String,
    active: bool,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<WebhookRow> for Webhook {
    type Error = WebhookError;

    fn try_from(row: WebhookRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_types: serde_json::from_str(&row.event_types)?,
            id: row.id,
            device_id: row.device_id,
            url: row.url,
            secret: row.secret,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryLogRow {
    id: String,
    webhook_id: String,
    event_type: String,
    status: String,
    attempt_count: i64,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<DeliveryLogRow> for DeliveryLog {
    type Error = WebhookError;

    fn try_from(row: DeliveryLogRow) -> Result<Self, Self::Error> {
        let status: DeliveryStatus = row
            .status
            .parse()
            .map_err(|e: String| WebhookError::Database(sqlx::Error::Decode(e.into())))?;
        Ok(Self {
            id: row.id,
            webhook_id: row.webhook_id,
            event_type: row.event_type,
            status,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or_default(),
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn ensure_url(url: &str) -> Result<(), WebhookError> {
    if url.trim().is_empty() {
        return Err(WebhookError::InvalidUrl("url must not be empty".into()));
    }
    Ok(())
}

/// SQLite-backed webhook configuration and delivery log.
pub struct SqliteWebhookStore {
    pool: sqlx::SqlitePool,
}

impl SqliteWebhookStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `webhook_config` and `delivery_log` tables.
    pub async fn init(pool: &sqlx::SqlitePool) -> Result<(), WebhookError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS webhook_config (
                id          TEXT PRIMARY KEY,
                device_id   TEXT NOT NULL,
                url         TEXT NOT NULL,
                secret      TEXT NOT NULL,
                event_types TEXT NOT NULL DEFAULT '[]',
                active      INTEGER NOT NULL DEFAULT 1,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhook_config_device ON webhook_config(device_id, active)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS delivery_log (
                id            TEXT PRIMARY KEY,
                webhook_id    TEXT NOT NULL REFERENCES webhook_config(id) ON DELETE CASCADE,
                event_type    TEXT NOT NULL,
                status        TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                last_error    TEXT,
                created_at    INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_delivery_log_webhook ON delivery_log(webhook_id, created_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WebhookStore for SqliteWebhookStore {
    async fn create_webhook(
        &self,
        device_id: &str,
        url: &str,
        secret: &str,
        event_types: &[EventType],
    ) -> Result<Webhook, WebhookError> {
        ensure_url(url)?;
        let now = now_ms();
        let webhook = Webhook {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            url: url.to_string(),
            secret: secret.to_string(),
            event_types: dedup_event_types(event_types),
            active: true,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"INSERT INTO webhook_config
                 (id, device_id, url, secret, event_types, active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 1, ?, ?)"#,
        )
        .bind(&webhook.id)
        .bind(&webhook.device_id)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(serde_json::to_string(&webhook.event_types)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        debug!(webhook_id = %webhook.id, device_id, "webhook created");
        Ok(webhook)
    }

    async fn update_webhook(
        &self,
        id: &str,
        device_id: &str,
        update: &WebhookUpdate,
    ) -> Result<Webhook, WebhookError> {
        ensure_url(&update.url)?;
        let rows = sqlx::query(
            r#"UPDATE webhook_config
               SET url = ?, secret = ?, event_types = ?, active = ?, updated_at = ?
               WHERE id = ? AND device_id = ?"#,
        )
        .bind(&update.url)
        .bind(&update.secret)
        .bind(serde_json::to_string(&dedup_event_types(&update.event_types))?)
        .bind(update.active)
        .bind(now_ms())
        .bind(id)
        .bind(device_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows == 0 {
            return Err(WebhookError::NotFound);
        }
        self.get_webhook(id, device_id).await
    }

    async fn get_webhook(&self, id: &str, device_id: &str) -> Result<Webhook, WebhookError> {
        sqlx::query_as::<_, WebhookRow>(
            "SELECT * FROM webhook_config WHERE id = ? AND device_id = ?",
        )
        .bind(id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(WebhookError::NotFound)?
        .try_into()
    }

    async fn list_webhooks(&self, device_id: &str) -> Result<Vec<Webhook>, WebhookError> {
        sqlx::query_as::<_, WebhookRow>(
            "SELECT * FROM webhook_config WHERE device_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Webhook::try_from)
        .collect()
    }

    async fn delete_webhook(&self, id: &str, device_id: &str) -> Result<(), WebhookError> {
        let rows = sqlx::query("DELETE FROM webhook_config WHERE id = ? AND device_id = ?")
            .bind(id)
            .bind(device_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(WebhookError::NotFound);
        }
        Ok(())
    }

    async fn active_webhooks(&self, device_id: &str) -> Result<Vec<Webhook>, WebhookError> {
        sqlx::query_as::<_, WebhookRow>(
            r#"SELECT * FROM webhook_config
               WHERE device_id = ? AND active = 1
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Webhook::try_from)
        .collect()
    }

    async fn log_delivery(
        &self,
        webhook_id: &str,
        event_type: EventType,
        status: DeliveryStatus,
        attempt_count: u32,
        last_error: Option<&str>,
    ) -> Result<DeliveryLog, WebhookError> {
        let now = now_ms();
        let entry = DeliveryLog {
            id: uuid::Uuid::new_v4().to_string(),
            webhook_id: webhook_id.to_string(),
            event_type: event_type.as_str().to_string(),
            status,
            attempt_count,
            last_error: last_error.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"INSERT INTO delivery_log
                 (id, webhook_id, event_type, status, attempt_count, last_error, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.id)
        .bind(&entry.webhook_id)
        .bind(&entry.event_type)
        .bind(status.as_str())
        .bind(i64::from(attempt_count))
        .bind(&entry.last_error)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn delivery_logs(
        &self,
        webhook_id: &str,
        limit: u32,
    ) -> Result<Vec<DeliveryLog>, WebhookError> {
        sqlx::query_as::<_, DeliveryLogRow>(
            r#"SELECT * FROM delivery_log WHERE webhook_id = ?
               ORDER BY created_at DESC, rowid DESC
               LIMIT ?"#,
        )
        .bind(webhook_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(DeliveryLog::try_from)
        .collect()
    }
}
