use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::SwitchboardConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "switchboard.toml",
    "switchboard.yaml",
    "switchboard.yml",
    "switchboard.json",
];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Restrict config discovery to `path`. Replaces any previous override.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<SwitchboardConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover the config file, load it, and apply environment overrides.
///
/// Search order:
/// 1. `./switchboard.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/switchboard/switchboard.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults when no file is found or the file fails to parse.
pub fn discover_and_load() -> SwitchboardConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                SwitchboardConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            SwitchboardConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Find the first config file in standard locations.
///
/// With a config dir override set, only that directory is searched.
fn find_config_file() -> Option<PathBuf> {
    let find_in = |dir: &Path| {
        CONFIG_FILENAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists())
    };

    if let Some(dir) = config_dir_override() {
        return find_in(&dir);
    }

    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

/// Returns the config directory: override, or `~/.config/switchboard/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("switchboard"))
}

/// Returns the data directory: `~/.switchboard/`.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".switchboard"))
        .unwrap_or_else(|| PathBuf::from(".switchboard"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("switchboard.toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SwitchboardConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

// ── Environment overrides ────────────────────────────────────────────────────

/// Apply `SWITCHBOARD_*` environment knobs on top of file values.
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(config: &mut SwitchboardConfig, lookup: impl Fn(&str) -> Option<String>) {
    fn set<T: FromStr>(slot: &mut T, name: &str, lookup: &dyn Fn(&str) -> Option<String>) {
        let Some(raw) = lookup(name) else {
            return;
        };
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(var = name, value = %raw, "ignoring unparseable environment override"),
        }
    }

    let lookup: &dyn Fn(&str) -> Option<String> = &lookup;
    let w = &mut config.webhooks;
    set(&mut w.enabled, "SWITCHBOARD_WEBHOOK_ENABLED", lookup);
    set(&mut w.workers, "SWITCHBOARD_WEBHOOK_WORKERS", lookup);
    set(&mut w.retry_limit, "SWITCHBOARD_WEBHOOK_RETRY_LIMIT", lookup);
    set(&mut w.max_per_device, "SWITCHBOARD_WEBHOOK_MAX_PER_DEVICE", lookup);
    set(&mut w.cache_ttl_secs, "SWITCHBOARD_WEBHOOK_CACHE_TTL", lookup);
    set(
        &mut config.auth.jwt_version_cache_ttl_secs,
        "SWITCHBOARD_JWT_VERSION_CACHE_TTL",
        lookup,
    );
    set(
        &mut config.auth.api_key_cache_ttl_secs,
        "SWITCHBOARD_API_KEY_CACHE_TTL",
        lookup,
    );
    if let Some(path) = lookup("SWITCHBOARD_DATABASE_PATH") {
        config.database.path = Some(PathBuf::from(path));
    }
}
