//! Configuration management for genloom
//!
//! Layered configuration loaded from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Settings can be overridden with the pattern `GENLOOM__<section>__<key>`:
//! - `GENLOOM__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `GENLOOM__SERVER__API__MAX_PAYLOAD_BYTES=10MB`
//! - `GENLOOM__MIRROR__WORKERS=8`
//!
//! # Configuration File
//!
//! By default, configuration is loaded from `config/genloom.toml`; the
//! path can be overridden via the `GENLOOM_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    ApiLimits, CacheConfig, Config, MirrorConfig, QueryConfig, ServerConfig, TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path. Useful for testing with
    /// custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
