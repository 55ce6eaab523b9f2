//! CLI configuration
//!
//! ```toml
//! log_filter = "topo_core=debug"
//!
//! [resolver]
//! worker_threads = 2
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use topo_core::ResolverConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct CliConfig {
    /// Used when `RUST_LOG` is unset
    pub(crate) log_filter: String,
    pub(crate) resolver: ResolverConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_string(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl CliConfig {
    pub(crate) fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("invalid CLI config")?;
        config.resolver.validate()?;
        Ok(config)
    }

    /// Defaults when no path is given
    pub(crate) fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }
}

pub(crate) fn init_tracing(fallback: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
