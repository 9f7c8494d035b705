//! Server configuration.
//!
//! Loaded from an optional TOML file, then overridden from `PORTAL_*`
//! environment variables, then validated.

use portal_governance::rate_limit::DEFAULT_CAPACITY;
use portal_governance::{Environment, FileUploadPolicy, RateLimitCategory};
use portal_telemetry::{LogFormat, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`ServerConfig`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override has an unusable value.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidEnv {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Loaded configuration is inconsistent.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Where rate-limit counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Bounded in-process store.
    #[default]
    Memory,
    /// Shared Redis instance.
    Redis,
}

/// Rate-limit counter store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitStoreConfig {
    /// Counter store backend.
    pub backend: StoreBackend,
    /// Maximum tracked counters in the memory store.
    pub capacity: usize,
    /// Idle time after which a memory counter may be evicted.
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,
    /// Interval between expired-counter sweeps.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Redis URL for the Redis backend.
    pub redis_url: Option<String>,
}

impl Default for RateLimitStoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            capacity: DEFAULT_CAPACITY,
            idle_ttl: RateLimitCategory::longest_window(),
            sweep_interval: Duration::from_secs(60),
            redis_url: None,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Deployment environment.
    pub environment: Environment,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
    /// Counter store settings.
    pub rate_limit: RateLimitStoreConfig,
    /// Attachment upload constraints.
    pub uploads: FileUploadPolicy,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: Environment::Development,
            allowed_origins: Vec::new(),
            rate_limit: RateLimitStoreConfig::default(),
            uploads: FileUploadPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the allowed CORS origins.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Load from `path` when given, apply environment overrides and validate.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path).await?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without overrides or validation.
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PORTAL_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `PORTAL_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PORTAL_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORTAL_PORT") {
            self.port = port.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    key: "PORTAL_PORT",
                    value: port.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(env) = lookup("PORTAL_ENV") {
            self.environment = env.parse().map_err(|e: portal_governance::GovernanceError| {
                ConfigError::InvalidEnv {
                    key: "PORTAL_ENV",
                    value: env.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(origins) = lookup("PORTAL_ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(url) = lookup("PORTAL_REDIS_URL") {
            self.rate_limit.redis_url = Some(url);
            self.rate_limit.backend = StoreBackend::Redis;
        }
        if let Some(level) = lookup("PORTAL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("PORTAL_LOG_FORMAT") {
            self.logging.format = format.parse().map_err(|e: portal_telemetry::LoggingError| {
                ConfigError::InvalidEnv {
                    key: "PORTAL_LOG_FORMAT",
                    value: format.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// Check the configuration for inconsistencies, reporting all of them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("port must be non-zero".to_string());
        }
        if self.socket_addr().is_err() {
            errors.push(format!("host '{}' is not a valid bind address", self.host));
        }
        if self.rate_limit.capacity == 0 {
            errors.push("rate_limit.capacity must be non-zero".to_string());
        }
        if self.rate_limit.sweep_interval.is_zero() {
            errors.push("rate_limit.sweep_interval must be non-zero".to_string());
        }
        let longest = RateLimitCategory::longest_window();
        if self.rate_limit.idle_ttl < longest {
            errors.push(format!(
                "rate_limit.idle_ttl must be at least the longest window ({}s)",
                longest.as_secs()
            ));
        }
        if self.rate_limit.backend == StoreBackend::Redis
            && self.rate_limit.redis_url.as_deref().map_or(true, str::is_empty)
        {
            errors.push("rate_limit.redis_url is required for the redis backend".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Log format in effect.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.logging.format
    }
}
