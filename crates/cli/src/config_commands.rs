use std::path::{Path, PathBuf};

use {anyhow::Result, clap::Subcommand, switchboard_config::SwitchboardConfig};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Load and validate the configuration. Fails on parse or validation
    /// errors instead of falling back to defaults.
    Check,
    /// Print the effective configuration as TOML.
    Show,
}

pub fn handle_config(action: ConfigAction, explicit: Option<&Path>) -> Result<()> {
    let (path, config) = load_strict(explicit)?;
    match action {
        ConfigAction::Check => {
            config.validate()?;
            match path {
                Some(path) => println!("{}: ok", path.display()),
                None => println!("no config file found, defaults: ok"),
            }
            Ok(())
        },
        ConfigAction::Show => {
            if let Some(path) = path {
                println!("# {}", path.display());
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

/// The file that would be used, parsed without the lenient fallback.
fn load_strict(explicit: Option<&Path>) -> Result<(Option<PathBuf>, SwitchboardConfig)> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(switchboard_config::find_or_default_config_path()).filter(|p| p.exists()),
    };
    let mut config = match &path {
        Some(path) => switchboard_config::load_config(path)?,
        None => SwitchboardConfig::default(),
    };
    switchboard_config::apply_env_overrides(&mut config, |k| std::env::var(k).ok());
    Ok((path, config))
}
