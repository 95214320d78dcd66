use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    sqlx::SqlitePool,
    switchboard_config::SwitchboardConfig,
    switchboard_webhooks::{
        CachedWebhookStore, EngineSettings, SqliteWebhookStore, Webhook, WebhookEngine,
        WebhookStore, WebhookUpdate, parse_event_types,
    },
};

#[derive(Subcommand)]
pub enum WebhookAction {
    /// List a device's webhooks.
    List {
        #[arg(long)]
        device: String,
    },
    /// Register a webhook.
    Create {
        #[arg(long)]
        device: String,
        #[arg(long)]
        url: String,
        /// HMAC-SHA256 signing secret.
        #[arg(long, env = "SWITCHBOARD_WEBHOOK_SECRET")]
        secret: String,
        /// Event type to subscribe to (repeatable). None means all.
        #[arg(long = "event")]
        events: Vec<String>,
    },
    /// Change a webhook. Omitted fields keep their value.
    Update {
        #[arg(long)]
        device: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        secret: Option<String>,
        /// Replaces the subscription list (repeatable).
        #[arg(long = "event")]
        events: Vec<String>,
        /// Subscribe to every event type.
        #[arg(long, conflicts_with = "events")]
        all_events: bool,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete a webhook and its delivery history.
    Delete {
        #[arg(long)]
        device: String,
        #[arg(long)]
        id: String,
    },
    /// Show recent delivery outcomes, newest first.
    Deliveries {
        #[arg(long)]
        webhook: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Send a `webhook.test` event now and wait for the outcome.
    Test {
        #[arg(long)]
        device: String,
        #[arg(long)]
        id: String,
    },
}

pub async fn handle_webhooks(action: WebhookAction, config: &SwitchboardConfig) -> Result<()> {
    let pool = crate::open_database(config).await?;
    run(action, config, pool).await
}

fn store(config: &SwitchboardConfig, pool: SqlitePool) -> Arc<dyn WebhookStore> {
    Arc::new(CachedWebhookStore::from_config(
        Arc::new(SqliteWebhookStore::new(pool)),
        &config.webhooks,
    ))
}

async fn run(action: WebhookAction, config: &SwitchboardConfig, pool: SqlitePool) -> Result<()> {
    let store = store(config, pool);
    match action {
        WebhookAction::List { device } => {
            let webhooks = store.list_webhooks(&device).await?;
            if webhooks.is_empty() {
                println!("No webhooks for {device}.");
                return Ok(());
            }
            println!("{:<36}  {:<6}  {:<40}  EVENTS", "ID", "ACTIVE", "URL");
            for w in &webhooks {
                println!(
                    "{:<36}  {:<6}  {:<40}  {}",
                    w.id,
                    w.active,
                    w.url,
                    describe_events(w)
                );
            }
            Ok(())
        },
        WebhookAction::Create {
            device,
            url,
            secret,
            events,
        } => {
            let events = parse_event_types(&events)?;
            let webhook = store.create_webhook(&device, &url, &secret, &events).await?;
            println!("{}", webhook.id);
            Ok(())
        },
        WebhookAction::Update {
            device,
            id,
            url,
            secret,
            events,
            all_events,
            active,
        } => {
            let current = store.get_webhook(&id, &device).await?;
            let event_types = if all_events {
                Vec::new()
            } else if events.is_empty() {
                current.event_types.clone()
            } else {
                parse_event_types(&events)?
            };
            let update = WebhookUpdate {
                url: url.unwrap_or(current.url),
                secret: secret.unwrap_or(current.secret),
                event_types,
                active: active.unwrap_or(current.active),
            };
            let webhook = store.update_webhook(&id, &device, &update).await?;
            println!("{}", serde_json::to_string_pretty(&webhook)?);
            Ok(())
        },
        WebhookAction::Delete { device, id } => {
            store.delete_webhook(&id, &device).await?;
            println!("Deleted {id}.");
            Ok(())
        },
        WebhookAction::Deliveries { webhook, limit } => {
            let logs = store.delivery_logs(&webhook, limit).await?;
            if logs.is_empty() {
                println!("No deliveries recorded for {webhook}.");
                return Ok(());
            }
            println!(
                "{:<24}  {:<8}  {:>8}  {:<13}  ERROR",
                "EVENT", "STATUS", "ATTEMPTS", "AT (ms)"
            );
            for log in &logs {
                println!(
                    "{:<24}  {:<8}  {:>8}  {:<13}  {}",
                    log.event_type,
                    log.status,
                    log.attempt_count,
                    log.created_at,
                    log.last_error.as_deref().unwrap_or("")
                );
            }
            Ok(())
        },
        WebhookAction::Test { device, id } => {
            let webhook = store.get_webhook(&id, &device).await?;
            let engine = WebhookEngine::start(Arc::clone(&store), EngineSettings {
                enabled: false,
                ..EngineSettings::from(&config.webhooks)
            })?;
            let outcome = engine.deliver(WebhookEngine::test_task(&webhook)).await;
            match outcome.last_error {
                Some(error) => println!(
                    "{} after {} attempts: {error}",
                    outcome.status, outcome.attempts
                ),
                None => println!("{} after {} attempts", outcome.status, outcome.attempts),
            }
            Ok(())
        },
    }
}

fn describe_events(webhook: &Webhook) -> String {
    if webhook.event_types.is_empty() {
        return "*".to_string();
    }
    webhook
        .event_types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
