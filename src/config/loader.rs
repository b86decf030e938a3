//! Configuration loading from disk and environment.
//!
//! # Responsibilities
//! - Find the config file (`local.toml`, then `config.toml`)
//! - Parse TOML into [`PipelineConfig`]
//! - Apply `PIPELINE_<SECTION>_<FIELD>` environment overrides
//! - Validate the result

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::{LogFormat, PipelineConfig};
use crate::config::validation::{validate_config, ValidationError};

/// File names tried in order, each across all search directories.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["local.toml", "config.toml"];

/// Directories searched when no path is given.
pub const DEFAULT_SEARCH_DIRS: [&str; 2] = [".", "/etc/response-pipeline"];

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PIPELINE_";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { key: String, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { key, value } => {
                write!(f, "Invalid value {:?} for environment override {}", value, key)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let config = read_file(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// First existing config file in `dirs`.
///
/// `local.toml` anywhere beats `config.toml` anywhere.
pub fn discover_config<P: AsRef<Path>>(dirs: &[P]) -> Option<PathBuf> {
    CONFIG_FILE_NAMES.iter().find_map(|name| {
        dirs.iter()
            .map(|dir| dir.as_ref().join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Startup loading: explicit path or discovered file (or defaults), then the
/// process environment, then validation.
///
/// Returns the config together with the file it came from, if any.
pub fn load(explicit: Option<&Path>) -> Result<(PipelineConfig, Option<PathBuf>), ConfigError> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config(&DEFAULT_SEARCH_DIRS),
    };
    let config = load_layered(path.as_deref(), std::env::vars())?;
    Ok((config, path))
}

/// File (or defaults) + environment overrides + validation.
pub fn load_layered<I>(path: Option<&Path>, vars: I) -> Result<PipelineConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => {
            tracing::info!("No config file found, using defaults");
            PipelineConfig::default()
        }
    };
    apply_env_overrides(&mut config, vars)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Apply `PIPELINE_*` variables. Unknown keys are ignored.
pub fn apply_env_overrides<I>(config: &mut PipelineConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match name {
            "APP_TITLE" => config.app.title = value.clone(),
            "APP_DEBUG" => config.app.debug = parse(&key, &value)?,
            "SERVER_HTTP_ADDR" => config.server.http_addr = value.clone(),
            "SERVER_READ_TIMEOUT_SECS" => config.server.read_timeout_secs = parse(&key, &value)?,
            "SERVER_WRITE_TIMEOUT_SECS" => config.server.write_timeout_secs = parse(&key, &value)?,
            "SERVER_IDLE_TIMEOUT_SECS" => config.server.idle_timeout_secs = parse(&key, &value)?,
            "SERVER_MAX_CONNECTIONS" => config.server.max_connections = parse(&key, &value)?,
            "CAPTURE_ENABLED" => config.capture.enabled = parse(&key, &value)?,
            "CAPTURE_MAX_BYTES" => config.capture.max_bytes = parse(&key, &value)?,
            "CACHE_ENABLED" => config.cache.enabled = parse(&key, &value)?,
            "CACHE_TTL_SECS" => config.cache.ttl_secs = parse(&key, &value)?,
            "CACHE_CLEANUP_INTERVAL_SECS" => {
                config.cache.cleanup_interval_secs = parse(&key, &value)?
            }
            "CACHE_BYPASS_PARAM" => config.cache.bypass_param = value.clone(),
            "TRANSFORM_ENABLED" => config.transform.enabled = parse(&key, &value)?,
            "TRANSFORM_DEFAULT_MEDIA_TYPE" => {
                config.transform.default_media_type = Some(value.clone()).filter(|v| !v.is_empty())
            }
            "OBSERVABILITY_LOG_LEVEL" => config.observability.log_level = value.clone(),
            "OBSERVABILITY_LOG_FORMAT" => {
                config.observability.log_format = match value.to_ascii_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::Env {
                            key: key.clone(),
                            value: value.clone(),
                        })
                    }
                }
            }
            "OBSERVABILITY_METRICS_ENABLED" => {
                config.observability.metrics_enabled = parse(&key, &value)?
            }
            "OBSERVABILITY_METRICS_ADDRESS" => config.observability.metrics_address = value.clone(),
            _ => continue,
        }
        tracing::debug!(key = %key, "Environment override applied");
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn local_wins_over_config_across_directories() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(first.path().join("config.toml"), "").unwrap();
        fs::write(second.path().join("local.toml"), "").unwrap();

        let found = discover_config(&[first.path(), second.path()]).unwrap();
        assert_eq!(found, second.path().join("local.toml"));

        let empty = tempfile::tempdir().unwrap();
        assert!(discover_config(&[empty.path()]).is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nenabled = true\nttl_secs = 60").unwrap();

        let config = load_layered(
            Some(file.path()),
            vars(&[
                ("PIPELINE_CACHE_ENABLED", "false"),
                ("PIPELINE_TRANSFORM_ENABLED", "true"),
                ("PIPELINE_OBSERVABILITY_LOG_FORMAT", "JSON"),
                ("PIPELINE_UNKNOWN", "ignored"),
                ("HOME", "/root"),
            ]),
        )
        .unwrap();

        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_secs, 60);
        assert!(config.transform.enabled);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_override_is_reported() {
        let err = load_layered(None, vars(&[("PIPELINE_CACHE_TTL_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "PIPELINE_CACHE_TTL_SECS"));
    }

    #[test]
    fn invalid_file_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nread_timeout_secs = 0").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().starts_with("Validation failed: "));
    }
}
