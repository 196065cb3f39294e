//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefix: STRATO_)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/strato-service/{service_name}/config.toml
//! 4. System directory: /etc/strato-service/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Request/response limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,

    /// Structured log sink configuration
    #[serde(default)]
    pub logger: LoggerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Enable the in-process metrics collector
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Enable tracing spans around dispatch
    #[serde(default = "default_true")]
    pub tracing_enabled: bool,
}

/// Request and response size/time limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes (0 = unbounded)
    #[serde(default)]
    pub max_request_size: usize,

    /// Maximum serialized response body size in bytes (0 = unbounded)
    #[serde(default)]
    pub max_response_size: usize,

    /// Per-invocation timeout in seconds (0 = runtime deadline only)
    #[serde(default)]
    pub timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to call HTTP-triggered routes
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Structured log sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Minimum level accepted by the sink (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Entries per flushed batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Background flush interval in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Buffered channel capacity; 0 means 2x batch_size
    #[serde(default)]
    pub buffer_size: usize,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per window per principal (0 = disabled)
    #[serde(default)]
    pub per_principal: u32,

    /// Rate limit window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_service_name() -> String {
    "strato-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    25
}

fn default_flush_interval() -> u64 {
    5
}

fn default_window_secs() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            environment: default_environment(),
            metrics_enabled: true,
            tracing_enabled: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 0,
            max_response_size: 0,
            timeout_secs: 0,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval(),
            buffer_size: 0,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_principal: 0,
            window_secs: default_window_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            logger: LoggerConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the provider chain
    pub fn load() -> Result<Self> {
        Self::load_named(&default_service_name())
    }

    /// Load configuration for a named service
    pub fn load_named(service_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        let system_path = format!("/etc/strato-service/{}/config.toml", service_name);
        if Path::new(&system_path).exists() {
            figment = figment.merge(Toml::file(&system_path));
        }

        let xdg_dirs = xdg::BaseDirectories::with_prefix("strato-service");
        let xdg_relative = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&xdg_relative) {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("STRATO_").split("__"));

        let config: Config = figment.extract()?;
        Ok(config)
    }

    /// Per-invocation timeout, when configured
    pub fn timeout(&self) -> Option<Duration> {
        (self.limits.timeout_secs > 0).then(|| Duration::from_secs(self.limits.timeout_secs))
    }

    /// Background flush interval for the log sink
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.logger.flush_interval_secs.max(1))
    }

    /// Effective sink buffer capacity: explicit, or 2x batch size
    pub fn buffer_size(&self) -> usize {
        if self.logger.buffer_size > 0 {
            self.logger.buffer_size
        } else {
            self.logger.batch_size * 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.logger.batch_size, 25);
        assert_eq!(config.logger.flush_interval_secs, 5);
        assert_eq!(config.buffer_size(), 50);
        assert_eq!(config.limits.max_request_size, 0);
        assert!(config.timeout().is_none());
        assert!(config.service.metrics_enabled);
    }

    #[test]
    fn explicit_buffer_size_wins() {
        let mut config = Config::default();
        config.logger.buffer_size = 7;
        assert_eq!(config.buffer_size(), 7);
    }

    #[test]
    fn timeout_from_secs() {
        let mut config = Config::default();
        config.limits.timeout_secs = 30;
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn flush_interval_floors_at_one_second() {
        let mut config = Config::default();
        config.logger.flush_interval_secs = 0;
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
    }
}
