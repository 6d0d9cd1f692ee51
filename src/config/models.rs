use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            query: QueryConfig::default(),
            mirror: MirrorConfig::default(),
            cache: CacheConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root directory for the document store and mirror queue keyspaces.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default)]
    pub api: ApiLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_path: default_data_path(),
            api: ApiLimits::default(),
        }
    }
}

/// API request limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiLimits {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/genloom")
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(5 * 1024 * 1024) // 5 MB
}

fn default_max_page_size() -> usize {
    100
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Declared `[filter_field, sort_field]` composite indexes. A
    /// filtered list whose combination is not listed here goes through
    /// the in-memory fallback scan instead.
    #[serde(default = "default_composite_indexes")]
    pub composite_indexes: Vec<(String, String)>,
    /// Raw page size multiplier when post-fetch filtering may discard
    /// items.
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,
    /// Upper bound on extra page fetches during a fallback scan.
    #[serde(default = "default_scan_max_iterations")]
    pub scan_max_iterations: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            composite_indexes: default_composite_indexes(),
            over_fetch_factor: default_over_fetch_factor(),
            scan_max_iterations: default_scan_max_iterations(),
            default_page_size: default_page_size(),
        }
    }
}

fn default_composite_indexes() -> Vec<(String, String)> {
    vec![
        ("status".to_string(), "created_at".to_string()),
        ("generation_type".to_string(), "created_at".to_string()),
    ]
}

fn default_over_fetch_factor() -> usize {
    3
}

fn default_scan_max_iterations() -> usize {
    8
}

fn default_page_size() -> usize {
    20
}

/// Mirror propagation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorConfig {
    #[serde(default = "default_mirror_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            workers: default_mirror_workers(),
            channel_size: default_channel_size(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_mirror_workers() -> usize {
    4
}

fn default_channel_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    200
}

/// Advisory cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
            capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    1024
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
}
