//! Configuration for the failure-handling plane
//!
//! Configuration is loaded from TOML, overridden from `FAULTLINE_*`
//! environment variables and validated before use. Every section has
//! defaults, so an empty document is a valid configuration.

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{FaultError, FaultResult};
use defaults::*;

/// Complete configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultlineConfig {
    pub app: AppConfig,
    pub logging: LoggingConfig,
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
    pub rpc: RpcConfig,
    pub http: HttpConfig,
    pub broker: BrokerConfig,
    pub lifecycle: LifecycleConfig,
}

/// Application identity, stamped on every telemetry scope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `faultline_core=debug`
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Install the OTLP exporter
    pub enabled: bool,
    pub otlp_endpoint: Option<String>,
    pub sample_rate: f64,
    /// Upper bound on flushing buffered events at shutdown
    #[serde(with = "humantime_serde")]
    pub flush_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub min_connections: u32,
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub enabled: bool,
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Bound on each acquisition step
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// Bound on each release step during teardown
    #[serde(with = "humantime_serde")]
    pub release_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_APP_NAME.to_string(),
            env: DEFAULT_APP_ENV.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            sample_rate: DEFAULT_TRACE_SAMPLE_RATE,
            flush_timeout: duration_secs(DEFAULT_TELEMETRY_FLUSH_TIMEOUT_SECS),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            db_name: DEFAULT_DB_NAME.to_string(),
            ssl_mode: DEFAULT_DB_SSL_MODE.to_string(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            max_lifetime: duration_secs(DEFAULT_DB_MAX_LIFETIME_SECS),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            base_path: DEFAULT_HTTP_BASE_PATH.to_string(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: vec![DEFAULT_BROKER_ADDRESS.to_string()],
            topic: String::new(),
            group_id: String::new(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: duration_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            release_timeout: duration_secs(DEFAULT_RELEASE_TIMEOUT_SECS),
        }
    }
}

// Configuration loading and management

impl FaultlineConfig {
    /// Parse a TOML document and validate it. No environment overrides.
    pub fn from_toml_str(contents: &str) -> FaultResult<Self> {
        let config: FaultlineConfig = toml::from_str(contents)
            .map_err(|e| FaultError::configuration("config", format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, apply environment overrides, then validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> FaultResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            FaultError::configuration(
                "config",
                format!("Failed to read config file {}: {}", path.as_ref().display(), e),
            )
        })?;

        let mut config: FaultlineConfig = toml::from_str(&contents)
            .map_err(|e| FaultError::configuration("config", format!("Failed to parse TOML: {}", e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> FaultResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok());
    }

    /// Apply overrides from `lookup`, keyed without the `FAULTLINE_` prefix.
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Option<T> {
            match raw.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring unparsable configuration override");
                    None
                }
            }
        }

        if let Some(v) = lookup("APP_NAME") {
            self.app.name = v;
        }
        if let Some(v) = lookup("APP_ENV") {
            self.app.env = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = lookup("OTLP_ENDPOINT") {
            self.telemetry.enabled = true;
            self.telemetry.otlp_endpoint = Some(v);
        }
        if let Some(v) = lookup("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("DB_PORT").and_then(|v| parsed("DB_PORT", v)) {
            self.database.port = v;
        }
        if let Some(v) = lookup("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("DB_NAME") {
            self.database.db_name = v;
        }
        if let Some(v) = lookup("RPC_PORT").and_then(|v| parsed("RPC_PORT", v)) {
            self.rpc.port = v;
        }
        if let Some(v) = lookup("HTTP_PORT").and_then(|v| parsed("HTTP_PORT", v)) {
            self.http.port = v;
        }
        if let Some(v) = lookup("BROKERS") {
            self.broker.brokers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> FaultResult<()> {
        if self.app.name.trim().is_empty() {
            return Err(FaultError::configuration("app", "Application name cannot be empty"));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(FaultError::configuration(
                    "logging",
                    format!("Invalid log format: {}", other),
                ))
            }
        }

        if !(0.0..=1.0).contains(&self.telemetry.sample_rate) {
            return Err(FaultError::configuration(
                "telemetry",
                format!("Sample rate must be within [0, 1], got {}", self.telemetry.sample_rate),
            ));
        }

        if self.database.enabled {
            if self.database.max_connections == 0 {
                return Err(FaultError::configuration(
                    "database",
                    "max_connections must be greater than 0",
                ));
            }
            if self.database.min_connections > self.database.max_connections {
                return Err(FaultError::configuration(
                    "database",
                    "min_connections cannot exceed max_connections",
                ));
            }
        }

        if self.rpc.enabled && self.http.enabled && self.rpc.port == self.http.port && self.rpc.port != 0 {
            return Err(FaultError::configuration(
                "servers",
                format!("RPC and HTTP servers cannot share port {}", self.rpc.port),
            ));
        }

        if self.broker.enabled {
            if self.broker.brokers.is_empty() {
                return Err(FaultError::configuration("broker", "At least one broker address is required"));
            }
            if self.broker.topic.is_empty() {
                return Err(FaultError::configuration("broker", "Topic cannot be empty"));
            }
        }

        if self.lifecycle.acquire_timeout.is_zero() {
            return Err(FaultError::configuration(
                "lifecycle",
                "acquire_timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}
