//! Governance configuration.
//!
//! Everything here is built once at startup and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::GovernanceError;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development over plain HTTP.
    #[default]
    Development,
    /// Pre-production, served like production.
    Staging,
    /// Production.
    Production,
}

impl Environment {
    /// Whether this deployment is served like production (HTTPS only).
    #[must_use]
    pub fn is_production_like(self) -> bool {
        matches!(self, Self::Staging | Self::Production)
    }
}

impl FromStr for Environment {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(GovernanceError::config(format!("unknown environment '{other}'"))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Staging => f.write_str("staging"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// A named quota: at most `max_requests` per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitCategory {
    /// Category name, part of the counter key.
    pub name: &'static str,
    /// Requests admitted per window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitCategory {
    /// General API traffic.
    pub const DEFAULT: Self = Self::new("default", 100, 15 * 60 * 1000);
    /// Login, registration and password reset.
    pub const AUTH: Self = Self::new("auth", 5, 15 * 60 * 1000);
    /// Payment intents and confirmations.
    pub const PAYMENT: Self = Self::new("payment", 10, 60 * 60 * 1000);
    /// Booking creation and changes.
    pub const BOOKING: Self = Self::new("booking", 20, 60 * 60 * 1000);

    /// The fixed category table.
    pub const ALL: [Self; 4] = [Self::DEFAULT, Self::AUTH, Self::PAYMENT, Self::BOOKING];

    /// Create a category.
    #[must_use]
    pub const fn new(name: &'static str, max_requests: u32, window_ms: u64) -> Self {
        Self {
            name,
            max_requests,
            window_ms,
        }
    }

    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Look up a category from the fixed table by name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name == name)
    }

    /// Longest window in the fixed table.
    #[must_use]
    pub fn longest_window() -> Duration {
        Self::ALL
            .iter()
            .map(Self::window)
            .max()
            .unwrap_or_default()
    }
}

impl fmt::Display for RateLimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Sanitization and size options for input governance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizationOptions {
    /// Escape HTML special characters in string leaves.
    #[serde(default = "default_true")]
    pub escape_xss: bool,

    /// Escape SQL metacharacters in string leaves.
    #[serde(default)]
    pub escape_sql: bool,

    /// Maximum characters kept per string leaf.
    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Maximum nesting depth for JSON bodies.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_string_length() -> usize {
    10_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_depth() -> usize {
    32
}

impl Default for SanitizationOptions {
    fn default() -> Self {
        Self {
            escape_xss: true,
            escape_sql: false,
            max_string_length: default_max_string_length(),
            max_body_bytes: default_max_body_bytes(),
            max_depth: default_max_depth(),
        }
    }
}

impl SanitizationOptions {
    /// Options for endpoints handling credentials or payments.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            escape_xss: true,
            escape_sql: true,
            max_string_length: 1_000,
            max_body_bytes: 100_000,
            max_depth: 8,
        }
    }

    /// Options for endpoints that accept free text and attachments.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            escape_xss: true,
            escape_sql: false,
            max_string_length: 50_000,
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            max_depth: 64,
        }
    }

    /// Set XSS escaping.
    #[must_use]
    pub fn with_escape_xss(mut self, enabled: bool) -> Self {
        self.escape_xss = enabled;
        self
    }

    /// Set SQL escaping.
    #[must_use]
    pub fn with_escape_sql(mut self, enabled: bool) -> Self {
        self.escape_sql = enabled;
        self
    }

    /// Set the per-string character limit.
    #[must_use]
    pub fn with_max_string_length(mut self, max: usize) -> Self {
        self.max_string_length = max;
        self
    }

    /// Set the body byte limit.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Set the nesting depth limit.
    #[must_use]
    pub fn with_max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_table() {
        assert_eq!(RateLimitCategory::AUTH.max_requests, 5);
        assert_eq!(RateLimitCategory::AUTH.window(), Duration::from_secs(900));
        assert_eq!(RateLimitCategory::by_name("payment"), Some(RateLimitCategory::PAYMENT));
        assert_eq!(RateLimitCategory::by_name("unknown"), None);
    }

    #[test]
    fn test_category_names_are_unique() {
        let mut names: Vec<_> = RateLimitCategory::ALL.iter().map(|c| c.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), RateLimitCategory::ALL.len());
    }

    #[test]
    fn test_longest_window() {
        assert_eq!(RateLimitCategory::longest_window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Development".parse::<Environment>().unwrap(), Environment::Development);
        assert!("moon".parse::<Environment>().is_err());
        assert!(Environment::Staging.is_production_like());
        assert!(!Environment::Development.is_production_like());
    }

    #[test]
    fn test_default_options() {
        let options = SanitizationOptions::default();
        assert!(options.escape_xss);
        assert!(!options.escape_sql);
        assert_eq!(options.max_string_length, 10_000);
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: SanitizationOptions =
            serde_json::from_str(r#"{"escape_sql": true, "max_body_bytes": 100000}"#).unwrap();
        assert!(options.escape_sql);
        assert!(options.escape_xss);
        assert_eq!(options.max_body_bytes, 100_000);
    }

    #[test]
    fn test_builder_methods() {
        let options = SanitizationOptions::strict()
            .with_escape_sql(false)
            .with_max_string_length(20);
        assert!(!options.escape_sql);
        assert_eq!(options.max_string_length, 20);
        assert_eq!(options.max_body_bytes, 100_000);
    }
}
