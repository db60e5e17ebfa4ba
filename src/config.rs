//! Broker configuration file lookup and parsing
//!
//! A missing or unreadable file is not an error: the gateway then runs with
//! defaults and an empty subscription set. A file that exists but cannot be
//! parsed is fatal, since silently running with the wrong broker would be
//! worse than not starting.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::mqtt::MqttConfig;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "MQTT_CONFIG";

/// File names probed in the working directory and next to the executable
pub const DEFAULT_FILE_NAMES: [&str; 2] = ["broker_config.toml", "broker_config.json"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to parse JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Picks the config file: explicit path, then `MQTT_CONFIG`, then the default
/// names in the working directory and beside the executable.
pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let mut candidates: Vec<PathBuf> = DEFAULT_FILE_NAMES.iter().map(PathBuf::from).collect();
    if let Some(dir) = exe_dir {
        candidates.extend(DEFAULT_FILE_NAMES.iter().map(|name| dir.join(name)));
    }
    candidates.into_iter().find(|candidate| candidate.is_file())
}

/// Resolves and loads the broker configuration.
pub fn load(explicit: Option<&Path>) -> Result<MqttConfig, ConfigError> {
    match resolve_path(explicit) {
        Some(path) => load_file(&path),
        None => {
            info!("No MQTT config file found, using defaults");
            Ok(MqttConfig::default())
        }
    }
}

/// Loads one config file; `.json` files are read as JSON, everything else as TOML.
pub fn load_file(path: &Path) -> Result<MqttConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(
                "MQTT config not readable at {} ({}), using defaults",
                path.display(),
                e
            );
            return Ok(MqttConfig::default());
        }
    };

    let config = parse(path, &content)?;
    config.validate().map_err(|reason| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;

    info!(
        "Loaded MQTT config from {} ({} topic(s))",
        path.display(),
        config.subscription_set().len()
    );
    Ok(config)
}

fn parse(path: &Path, content: &str) -> Result<MqttConfig, ConfigError> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    } else {
        toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }
}
