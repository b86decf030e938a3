//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pipeline.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Application identity.
    pub app: AppConfig,

    /// Transport settings passed through to the HTTP server.
    pub server: ServerConfig,

    /// Body capture / body logging.
    pub capture: CaptureConfig,

    /// Response cache.
    pub cache: CacheConfig,

    /// Body transforms (minification).
    pub transform: TransformConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Application identity.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub title: String,
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "response-pipeline".to_string(),
            debug: false,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub http_addr: String,

    /// Time allowed for the client to send request headers.
    pub read_timeout_secs: u64,

    /// Time allowed for the handler to commit the response head.
    pub write_timeout_secs: u64,

    /// HTTP/2 keep-alive ping interval and timeout.
    pub idle_timeout_secs: u64,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            read_timeout_secs: 5,
            write_timeout_secs: 10,
            idle_timeout_secs: 15,
            max_connections: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Body capture settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Log response bodies.
    pub enabled: bool,

    /// Bodies larger than this are neither logged in full nor cached.
    pub max_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_bytes: 1024 * 1024,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Lifetime of a stored entry.
    pub ttl_secs: u64,

    /// Period of the expired-entry sweep.
    pub cleanup_interval_secs: u64,

    /// Query parameter that skips the lookup when `true`.
    pub bypass_param: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            cleanup_interval_secs: 600,
            bypass_param: crate::cache::DEFAULT_BYPASS_PARAM.to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Body transform settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct TransformConfig {
    pub enabled: bool,

    /// Media type assumed when the handler sets no `Content-Type`.
    pub default_media_type: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default level for the crate's own events.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Address of the Prometheus scrape endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
