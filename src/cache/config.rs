//! Configuration for the statement cache

use crate::error::{Result, StatementError};
use serde::{Deserialize, Serialize};

/// Configuration for a connection's statement cache
///
/// When `enabled` is false the cache is never constructed and every statement
/// goes to the database as a one-shot execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether prepared statements are cached at all
    pub enabled: bool,

    /// Maximum number of resident prepared statements
    pub capacity: usize,

    /// Re-prepare once when the server reports a cached handle as stale
    pub retry_stale: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 512,
            retry_stale: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.capacity == 0 {
            return Err(StatementError::ConfigError(
                "capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    enabled: Option<bool>,
    capacity: Option<usize>,
    retry_stale: Option<bool>,
}

impl CacheConfigBuilder {
    /// Enable or disable statement caching
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set maximum number of cached statements
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Enable or disable the single re-prepare on stale handles
    pub fn retry_stale(mut self, retry: bool) -> Self {
        self.retry_stale = Some(retry);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            capacity: self.capacity.unwrap_or(defaults.capacity),
            retry_stale: self.retry_stale.unwrap_or(defaults.retry_stale),
        }
    }
}

/// Preset configurations
impl CacheConfig {
    /// No caching: every statement is parsed and planned on each execution
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// For short-lived connections running a handful of statements
    pub fn small() -> Self {
        Self {
            capacity: 32,
            ..Default::default()
        }
    }

    /// For long-lived connections with a wide statement mix
    pub fn large() -> Self {
        Self {
            capacity: 4096,
            ..Default::default()
        }
    }
}
