use {
    anyhow::Result,
    clap::Subcommand,
    switchboard_common::mask_identifier,
    switchboard_config::SwitchboardConfig,
    switchboard_routing::{RoutingRecord, RoutingStore, SqliteRoutingStore},
};

#[derive(Subcommand)]
pub enum RoutingAction {
    /// List routing records. External ids are masked unless `--reveal`.
    List {
        /// Only records currently receiving traffic.
        #[arg(long)]
        active: bool,
        #[arg(long)]
        reveal: bool,
    },
}

pub async fn handle_routing(action: RoutingAction, config: &SwitchboardConfig) -> Result<()> {
    let pool = crate::open_database(config).await?;
    let store = SqliteRoutingStore::new(pool);
    match action {
        RoutingAction::List { active, reveal } => {
            let records: Vec<RoutingRecord> = store
                .list()
                .await?
                .into_iter()
                .filter(|r| !active || r.is_active)
                .collect();
            if records.is_empty() {
                println!("No routing records.");
                return Ok(());
            }
            println!("{:<36}  {:<20}  {:<6}  LAST LOGIN (ms)", "DEVICE", "ACCOUNT", "ACTIVE");
            for r in &records {
                println!(
                    "{:<36}  {:<20}  {:<6}  {}",
                    r.device_id,
                    account_label(r, reveal),
                    r.is_active,
                    r.last_login_at.map(|t| t.to_string()).unwrap_or_default()
                );
            }
            Ok(())
        },
    }
}

fn account_label(record: &RoutingRecord, reveal: bool) -> String {
    match &record.external_account_id {
        Some(id) if reveal => id.clone(),
        Some(id) => mask_identifier(id),
        None => "-".to_string(),
    }
}
