use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    secrecy::ExposeSecret,
    switchboard_auth::AuthContext,
    switchboard_config::SwitchboardConfig,
    switchboard_routing::SqliteRoutingStore,
};

#[derive(Subcommand)]
pub enum KeyAction {
    /// Issue a new API key. The key is printed once and never stored.
    Issue {
        #[arg(long)]
        device: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// List a device's keys.
    List {
        #[arg(long)]
        device: String,
    },
    /// Revoke one key.
    Revoke {
        #[arg(long)]
        device: String,
        #[arg(long)]
        id: String,
    },
    /// Invalidate every bearer token issued to a device.
    RevokeTokens {
        #[arg(long)]
        device: String,
    },
}

pub async fn handle_keys(action: KeyAction, config: &SwitchboardConfig) -> Result<()> {
    let pool = crate::open_database(config).await?;
    let auth = AuthContext::new(Arc::new(SqliteRoutingStore::new(pool)), &config.auth);
    match action {
        KeyAction::Issue { device, label } => {
            let issued = auth.issue_api_key(&device, label).await?;
            println!("id:  {}", issued.record.id);
            println!("key: {}", issued.key.expose_secret());
            Ok(())
        },
        KeyAction::List { device } => {
            let keys = auth.list_api_keys(&device).await?;
            if keys.is_empty() {
                println!("No API keys for {device}.");
                return Ok(());
            }
            println!("{:<36}  {:<20}  {:<8}  CREATED (ms)", "ID", "LABEL", "STATUS");
            for k in &keys {
                println!(
                    "{:<36}  {:<20}  {:<8}  {}",
                    k.id,
                    k.label.as_deref().unwrap_or("-"),
                    if k.is_revoked() { "revoked" } else { "active" },
                    k.created_at
                );
            }
            Ok(())
        },
        KeyAction::Revoke { device, id } => {
            if auth.revoke_api_key(&id, &device).await? {
                println!("Revoked {id}.");
                Ok(())
            } else {
                anyhow::bail!("no api key {id} for device {device}")
            }
        },
        KeyAction::RevokeTokens { device } => {
            let version = auth.revoke_tokens(&device).await?;
            println!("Token version for {device} is now {version}.");
            Ok(())
        },
    }
}
