//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `autoedge.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use autoedge_adapter_remote_http::RemoteHttpConfig;
use autoedge_app::settings::EngineSettings;
use autoedge_domain::circuit::CircuitPolicy;
use autoedge_domain::policy::PolicyConfig;
use autoedge_domain::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Which remote platform the agent drives.
    pub remote: RemoteConfig,
    pub engine: EngineConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub capabilities: CapabilitiesConfig,
    pub records: RecordsConfig,
    /// Tag and critical-domain rules applied at validation.
    pub policy: PolicyConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteMode {
    /// In-process simulated devices.
    #[default]
    Virtual,
    /// A Home-Assistant-style REST platform.
    Http,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub mode: RemoteMode,
    #[serde(flatten)]
    pub http: RemoteHttpConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the worker pool.
    pub workers: usize,
    /// Timeout of a single remote call.
    pub call_timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: u32,
    pub max_delay_ms: u64,
    /// Consecutive failures that open a target's circuit.
    pub circuit_threshold: u32,
    pub circuit_cooldown_ms: u64,
    /// How long a finished task answers for its idempotency key.
    pub idempotency_retention_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending tasks beyond which new submissions are refused.
    pub high_water_mark: usize,
    /// Age after which finished tasks are purged.
    pub history_retention_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    pub refresh_interval_secs: u64,
    pub refresh_attempts: u32,
    pub refresh_retry_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// Execution records kept before the oldest are evicted.
    pub max_records: usize,
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from `autoedge.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("AUTOEDGE_CONFIG").unwrap_or_else(|_| "autoedge.toml".to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AUTOEDGE_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("AUTOEDGE_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("AUTOEDGE_BIND") {
            if let Some((host, port)) = val.rsplit_once(':') {
                self.server.host = host.to_string();
                if let Ok(port) = port.parse() {
                    self.server.port = port;
                }
            }
        }
        if let Ok(val) = std::env::var("AUTOEDGE_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("AUTOEDGE_REMOTE_URL") {
            self.remote.mode = RemoteMode::Http;
            self.remote.http.base_url = val;
        }
        if let Ok(val) = std::env::var("AUTOEDGE_REMOTE_TOKEN") {
            self.remote.http.token = val;
        }
        if let Ok(val) = std::env::var("AUTOEDGE_WORKERS") {
            if let Ok(workers) = val.parse() {
                self.engine.workers = workers;
            }
        }
        if let Ok(val) = std::env::var("AUTOEDGE_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.engine.workers == 0 {
            return Err(ConfigError::Validation(
                "engine.workers must be at least 1".to_string(),
            ));
        }
        if self.engine.call_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "engine.call_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.engine.backoff_multiplier == 0 {
            return Err(ConfigError::Validation(
                "engine.backoff_multiplier must be at least 1".to_string(),
            ));
        }
        if self.engine.circuit_threshold == 0 {
            return Err(ConfigError::Validation(
                "engine.circuit_threshold must be at least 1".to_string(),
            ));
        }
        if self.queue.high_water_mark == 0 {
            return Err(ConfigError::Validation(
                "queue.high_water_mark must be at least 1".to_string(),
            ));
        }
        if self.scheduler.tick_ms == 0 || self.capabilities.refresh_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "scheduler and refresh intervals must be non-zero".to_string(),
            ));
        }
        if self.remote.mode == RemoteMode::Http && self.remote.http.token.is_empty() {
            return Err(ConfigError::Validation(
                "remote.token is required in http mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            workers: self.engine.workers,
            call_timeout: Duration::from_millis(self.engine.call_timeout_ms),
            retry: RetryPolicy {
                max_retries: self.engine.max_retries,
                base_delay: Duration::from_millis(self.engine.base_delay_ms),
                multiplier: self.engine.backoff_multiplier,
                max_delay: Duration::from_millis(self.engine.max_delay_ms),
            },
            circuit: CircuitPolicy {
                threshold: self.engine.circuit_threshold,
                cooldown: Duration::from_millis(self.engine.circuit_cooldown_ms),
            },
            policy: self.policy.clone(),
            high_water_mark: self.queue.high_water_mark,
            idempotency_retention: Duration::from_secs(self.engine.idempotency_retention_secs),
            history_retention: Duration::from_secs(self.queue.history_retention_secs),
            max_records: self.records.max_records,
            refresh_attempts: self.capabilities.refresh_attempts,
            refresh_retry_delay: Duration::from_millis(self.capabilities.refresh_retry_delay_ms),
        }
    }

    #[must_use]
    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_ms)
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.capabilities.refresh_interval_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.records.sweep_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:autoedge.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "autoedged=info,autoedge=info,tower_http=debug".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            call_timeout_ms: 10_000,
            max_retries: 3,
            base_delay_ms: 500,
            backoff_multiplier: 2,
            max_delay_ms: 30_000,
            circuit_threshold: 5,
            circuit_cooldown_ms: 30_000,
            idempotency_retention_secs: 24 * 3600,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 1000,
            history_retention_secs: 7 * 24 * 3600,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            refresh_attempts: 3,
            refresh_retry_delay_ms: 1000,
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            sweep_interval_secs: 300,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.url, "sqlite:autoedge.db?mode=rwc");
        assert_eq!(config.remote.mode, RemoteMode::Virtual);
        assert_eq!(config.engine.workers, 4);
        assert_eq!(config.queue.high_water_mark, 1000);
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.scheduler.tick_ms, 1000);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [server]
            host = '127.0.0.1'
            port = 9090

            [database]
            url = 'sqlite:test.db'

            [logging]
            filter = 'debug'

            [remote]
            mode = 'http'
            base_url = 'http://ha.local:8123'
            token = 'secret'

            [engine]
            workers = 2
            max_retries = 5
            circuit_threshold = 3

            [queue]
            high_water_mark = 10

            [policy]
            critical_domains = ['lock']
            denied_tags = ['experimental']
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.url, "sqlite:test.db");
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.remote.mode, RemoteMode::Http);
        assert_eq!(config.remote.http.base_url, "http://ha.local:8123");
        assert_eq!(config.remote.http.token, "secret");
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.engine.circuit_threshold, 3);
        assert_eq!(config.queue.high_water_mark, 10);
        assert!(config.policy.denied_tags.contains("experimental"));
        assert_eq!(config.policy.override_tag, "allow-critical");
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_reject_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_empty_worker_pool() {
        let mut config = Config::default();
        config.engine.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_require_token_in_http_mode() {
        let mut config = Config::default();
        config.remote.mode = RemoteMode::Http;
        assert!(config.validate().is_err());

        config.remote.http.token = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_accept_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn should_format_bind_addr() {
        let mut config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 9090;
        assert_eq!(config.bind_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn should_convert_to_engine_settings() {
        let toml = "
            [engine]
            call_timeout_ms = 250
            base_delay_ms = 10
            max_delay_ms = 40
            circuit_cooldown_ms = 1500

            [records]
            max_records = 42
        ";
        let config: Config = toml::from_str(toml).unwrap();
        let settings = config.engine_settings();
        assert_eq!(settings.call_timeout, Duration::from_millis(250));
        assert_eq!(settings.retry.base_delay, Duration::from_millis(10));
        assert_eq!(settings.retry.max_delay, Duration::from_millis(40));
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.circuit.cooldown, Duration::from_millis(1500));
        assert_eq!(settings.max_records, 42);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
