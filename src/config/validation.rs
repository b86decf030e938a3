//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Validate addresses and names the runtime will parse later
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::PipelineConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("cache.bypass_param: must not be empty")]
    EmptyBypassParam,

    #[error("observability.log_level: unknown level {0:?}")]
    UnknownLogLevel(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.http_addr.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "server.http_addr",
            value: config.server.http_addr.clone(),
        });
    }
    let positive = [
        ("server.read_timeout_secs", config.server.read_timeout_secs),
        ("server.write_timeout_secs", config.server.write_timeout_secs),
        ("server.idle_timeout_secs", config.server.idle_timeout_secs),
        ("server.max_connections", config.server.max_connections as u64),
        ("capture.max_bytes", config.capture.max_bytes as u64),
        ("cache.ttl_secs", config.cache.ttl_secs),
        ("cache.cleanup_interval_secs", config.cache.cleanup_interval_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::MustBePositive { field });
        }
    }
    if config.cache.bypass_param.trim().is_empty() {
        errors.push(ValidationError::EmptyBypassParam);
    }
    if !LOG_LEVELS.contains(&config.observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
