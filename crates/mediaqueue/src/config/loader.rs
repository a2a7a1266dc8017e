use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/queue-config-v1.json");

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "MEDIAQUEUE_";

/// Loads a JSON or YAML (`.yaml` / `.yml`) config file, then applies
/// `MEDIAQUEUE_*` environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    let json_value: serde_json::Value = if is_yaml {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };

    let mut config = parse_value(json_value)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    log::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Default configuration with environment overrides applied.
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;
    let config = parse_value(json_value)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_from_yaml_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_yaml::from_str(content)?;
    let config = parse_value(json_value)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_value(json_value: serde_json::Value) -> Result<Config, ConfigError> {
    validate_schema(&json_value)?;
    Ok(serde_json::from_value(json_value)?)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn env_override<T>(suffix: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let name = format!("{}{}", ENV_PREFIX, suffix);
    match std::env::var(&name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidOverride {
                name,
                reason: e.to_string(),
            }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidOverride {
            name,
            reason: e.to_string(),
        }),
    }
}

/// Applies `MEDIAQUEUE_*` variables on top of `config`.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Some(path) = env_override::<PathBuf>("DATABASE_PATH")? {
        config.database_path = Some(path);
    }
    if let Some(count) = env_override("WORKER_COUNT")? {
        config.worker_count = count;
    }
    if let Some(ms) = env_override("POLL_INTERVAL_MS")? {
        config.worker.poll_interval_ms = ms;
    }
    if let Some(secs) = env_override("LEASE_SECS")? {
        config.worker.lease_secs = secs;
    }
    if let Some(secs) = env_override("RECLAIM_INTERVAL_SECS")? {
        config.scheduler.reclaim_interval_secs = secs;
    }
    if let Some(attempts) = env_override("MAX_ATTEMPTS")? {
        config.retry.max_attempts = attempts;
    }
    if let Some(ms) = env_override("MAX_JITTER_MS")? {
        config.actions.max_jitter_ms = ms;
    }
    if let Some(level) = env_override::<String>("LOG_LEVEL")? {
        config.logging.level = level;
    }
    if let Some(json) = env_override("LOG_JSON")? {
        config.logging.json = json;
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.worker.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "worker.poll_interval_ms must be positive".to_string(),
        });
    }

    if config.worker.event_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "worker.event_capacity must be at least 1".to_string(),
        });
    }

    if config.worker.store_retry_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "worker.store_retry_attempts must be at least 1".to_string(),
        });
    }

    // A lease shorter than the longest action would hand running jobs to a second worker.
    let lease_ms = config.worker.lease_secs.saturating_mul(1000);
    if lease_ms <= config.actions.max_jitter_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "worker.lease_secs ({}s) must exceed actions.max_jitter_ms ({}ms)",
                config.worker.lease_secs, config.actions.max_jitter_ms
            ),
        });
    }

    if config.scheduler.reclaim_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.reclaim_interval_secs must be positive".to_string(),
        });
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.max_attempts must be at least 1".to_string(),
        });
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                config.retry.base_delay_ms, config.retry.max_delay_ms
            ),
        });
    }

    for ext in &config.actions.encodable_extensions {
        let bare = ext.trim().trim_start_matches('.');
        if bare.is_empty() || bare.contains(['.', '/', '\\']) {
            return Err(ConfigError::Validation {
                message: format!("Invalid encodable extension: '{}'", ext),
            });
        }
    }

    if config.logging.level.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "logging.level must not be empty".to_string(),
        });
    }

    Ok(())
}
