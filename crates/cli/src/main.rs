mod config_commands;
mod key_commands;
mod routing_commands;
mod webhook_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    switchboard_config::SwitchboardConfig,
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "switchboard", about = "Switchboard: messaging gateway administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of discovery.
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Webhook administration.
    Webhooks {
        #[command(subcommand)]
        action: webhook_commands::WebhookAction,
    },
    /// Routing table inspection.
    Routing {
        #[command(subcommand)]
        action: routing_commands::RoutingAction,
    },
    /// Device API keys.
    Keys {
        #[command(subcommand)]
        action: key_commands::KeyAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Explicit file (plus environment overrides) or the discovered config.
fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SwitchboardConfig> {
    match path {
        Some(path) => {
            let mut config = switchboard_config::load_config(path)?;
            switchboard_config::apply_env_overrides(&mut config, |k| std::env::var(k).ok());
            Ok(config)
        },
        None => Ok(switchboard_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");

    match cli.command {
        Commands::Config { action } => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
        command => {
            let config = load_config(cli.config.as_ref())?;
            run(command, &config).await
        },
    }
}

/// Open the configured database with every schema in place.
async fn open_database(config: &SwitchboardConfig) -> anyhow::Result<sqlx::SqlitePool> {
    let pool = switchboard_gateway::db::open_pool(&config.database).await?;
    switchboard_gateway::db::init_schema(&pool).await?;
    Ok(pool)
}

async fn run(command: Commands, config: &SwitchboardConfig) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => config_commands::handle_config(action, None),
        Commands::Webhooks { action } => webhook_commands::handle_webhooks(action, config).await,
        Commands::Routing { action } => routing_commands::handle_routing(action, config).await,
        Commands::Keys { action } => key_commands::handle_keys(action, config).await,
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_webhook_create() {
        let cli = Cli::try_parse_from([
            "switchboard",
            "webhooks",
            "create",
            "--device",
            "dev-1",
            "--url",
            "https://example.com/hook",
            "--secret",
            "s",
            "--event",
            "message.received",
            "--event",
            "call.offer",
        ])
        .unwrap();
        let Commands::Webhooks {
            action: webhook_commands::WebhookAction::Create { events, .. },
        } = cli.command
        else {
            panic!("wrong command");
        };
        assert_eq!(events, vec!["message.received", "call.offer"]);
    }

    #[test]
    fn test_deliveries_limit_defaults() {
        let cli =
            Cli::try_parse_from(["switchboard", "webhooks", "deliveries", "--webhook", "w1"])
                .unwrap();
        let Commands::Webhooks {
            action: webhook_commands::WebhookAction::Deliveries { limit, .. },
        } = cli.command
        else {
            panic!("wrong command");
        };
        assert_eq!(limit, 20);
    }

    #[test]
    fn test_load_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(&path, "[server]\nport = 9090\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
