//! Resolver configuration
//!
//! Plain serde structs with defaults, loadable from TOML:
//!
//! ```toml
//! plan_id_key = "camp.plan.id"
//! worker_threads = 4
//! attribute_wait_timeout_ms = 30000
//! attribute_readiness = "present"
//!
//! [not_found]
//! policy = "poll"
//! interval_ms = 250
//! timeout_ms = 5000
//! ```

use crate::entity::Readiness;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config key holding an entity's blueprint-stable identifier
pub const DEFAULT_PLAN_ID_KEY: &str = "camp.plan.id";

/// Configuration load failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML did not match the expected shape
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Values parsed but are inconsistent
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// What a scope search does when nothing matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum NotFoundPolicy {
    /// Fail immediately with `ComponentNotFound`
    #[default]
    FailFast,
    /// Re-run the search until a match or the timeout
    Poll { interval_ms: u64, timeout_ms: u64 },
}

impl NotFoundPolicy {
    /// Polling policy
    #[inline]
    #[must_use]
    pub fn poll(interval: Duration, timeout: Duration) -> Self {
        Self::Poll {
            interval_ms: duration_ms(interval),
            timeout_ms: duration_ms(timeout),
        }
    }
}

/// Resolver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Config key scope searches match ids against
    pub plan_id_key: String,
    /// Worker threads for the bundled runtime
    pub worker_threads: usize,
    /// Scope-miss behaviour
    pub not_found: NotFoundPolicy,
    /// Upper bound on attribute waits, unbounded when absent
    pub attribute_wait_timeout_ms: Option<u64>,
    /// When a waited-on attribute counts as ready
    pub attribute_readiness: Readiness,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            plan_id_key: DEFAULT_PLAN_ID_KEY.to_string(),
            worker_threads: 4,
            not_found: NotFoundPolicy::FailFast,
            attribute_wait_timeout_ms: None,
            attribute_readiness: Readiness::Present,
        }
    }
}

impl ResolverConfig {
    /// Create default config
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set plan id key
    #[inline]
    #[must_use]
    pub fn with_plan_id_key(mut self, key: impl Into<String>) -> Self {
        self.plan_id_key = key.into();
        self
    }

    /// Set worker threads
    #[inline]
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set scope-miss policy
    #[inline]
    #[must_use]
    pub fn with_not_found(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }

    /// Set attribute wait timeout
    #[inline]
    #[must_use]
    pub fn with_attribute_wait_timeout(mut self, timeout: Duration) -> Self {
        self.attribute_wait_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Set attribute readiness rule
    #[inline]
    #[must_use]
    pub fn with_attribute_readiness(mut self, readiness: Readiness) -> Self {
        self.attribute_readiness = readiness;
        self
    }

    /// Attribute wait timeout, if bounded
    #[inline]
    #[must_use]
    pub fn attribute_wait_timeout(&self) -> Option<Duration> {
        self.attribute_wait_timeout_ms.map(Duration::from_millis)
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Malformed TOML or inconsistent values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Unreadable file, malformed TOML or inconsistent values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check values for consistency
    ///
    /// # Errors
    /// Empty plan id key, zero workers, or a zero poll interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plan_id_key.trim().is_empty() {
            return Err(ConfigError::Invalid("plan_id_key must not be empty".into()));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        if let NotFoundPolicy::Poll { interval_ms: 0, .. } = self.not_found {
            return Err(ConfigError::Invalid("poll interval must be positive".into()));
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
