//! Default configuration values for faultline
//!
//! All defaults live here so they are easy to find and change.

use std::time::Duration;

// Application identity
pub const DEFAULT_APP_NAME: &str = "faultline";
pub const DEFAULT_APP_ENV: &str = "development";

// Logging
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "pretty";

// Telemetry
pub const DEFAULT_TRACE_SAMPLE_RATE: f64 = 1.0;
pub const DEFAULT_TELEMETRY_FLUSH_TIMEOUT_SECS: u64 = 2;

// Database
pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DB_NAME: &str = "postgres";
pub const DEFAULT_DB_SSL_MODE: &str = "disable";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DB_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_DB_MAX_LIFETIME_SECS: u64 = 30 * 60;

// Servers
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_RPC_PORT: u16 = 9090;
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_HTTP_BASE_PATH: &str = "/";

// Broker
pub const DEFAULT_BROKER_ADDRESS: &str = "localhost:9092";

// Lifecycle
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RELEASE_TIMEOUT_SECS: u64 = 10;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "FAULTLINE_";

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
