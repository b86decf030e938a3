//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML: local.toml, then config.toml)
//!     → loader.rs (parse, PIPELINE_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → handle.rs (ArcSwap, one snapshot per request)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap in ConfigHandle
//!     → requests started afterwards see the new snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod handle;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use handle::ConfigHandle;
pub use loader::{load, ConfigError};
pub use schema::{
    CacheConfig, CaptureConfig, LogFormat, ObservabilityConfig, PipelineConfig, ServerConfig,
    TransformConfig,
};
