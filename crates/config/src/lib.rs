//! Configuration loading: file discovery, `${VAR}` substitution, environment
//! overrides and startup validation.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, config_dir, data_dir, discover_and_load,
        find_or_default_config_path, load_config, set_config_dir,
    },
    schema::{
        AuthConfig, ConfigError, DatabaseConfig, EgressConfig, RegistryConfig, ServerConfig,
        SwitchboardConfig, WebhooksConfig,
    },
};
