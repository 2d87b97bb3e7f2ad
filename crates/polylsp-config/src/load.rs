use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::error::ConfigError;

/// Load configuration from a TOML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is missing, unreadable,
/// unparseable, or fails validation.
pub fn load_config(config_path: &Path) -> Result<Config, ConfigError> {
    if !config_path.exists() {
        return Err(ConfigError::NotFound(config_path.to_path_buf()));
    }
    let content = std::fs::read_to_string(config_path)?;
    let config = load_from_str(&content)?;
    tracing::info!(
        servers = config.lsps.len(),
        "loaded config from {}",
        config_path.display()
    );
    Ok(config)
}

/// Parse and validate configuration from a TOML string.
pub fn load_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();
    for (i, entry) in config.lsps.iter().enumerate() {
        if entry.id.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: format!("lsps[{}].id", i),
                message: "must not be empty".into(),
            });
        }
        if entry.command.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: format!("lsps[{}].command", i),
                message: "must not be empty".into(),
            });
        }
        if !seen_ids.insert(entry.id.as_str()) {
            return Err(ConfigError::Validation {
                field: format!("lsps[{}].id", i),
                message: format!("duplicate server id '{}'", entry.id),
            });
        }
        if entry.extensions.is_empty() && entry.languages.is_empty() {
            tracing::warn!(
                server = %entry.id,
                "entry has no extensions or languages; only reachable by id"
            );
        }
    }
    Ok(())
}
