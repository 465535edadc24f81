use crate::core::errors::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How tasks are dispatched within a single `run` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// Contiguous batches of `max_concurrent`; a batch settles before the next starts
    #[default]
    Batched,
    /// Sliding window: up to `max_concurrent` tasks in flight at any time
    Windowed,
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of producers running at once
    #[serde(alias = "maxConcurrent")]
    pub max_concurrent: usize,
    /// Cache entry freshness window in milliseconds
    #[serde(alias = "cacheTTL", alias = "cacheTtl")]
    pub cache_ttl_ms: u64,
    /// Cache entry count ceiling
    #[serde(alias = "cacheMaxSize")]
    pub cache_max_size: usize,
    pub scheduling: Scheduling,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            cache_ttl_ms: 3_600_000, // 1 hour
            cache_max_size: 1000,
            scheduling: Scheduling::Batched,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new builder for OrchestratorConfig
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::new()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(OrchestratorError::configuration_field(
                "max_concurrent must be greater than 0",
                "max_concurrent",
            ));
        }
        if self.cache_ttl_ms == 0 {
            return Err(OrchestratorError::configuration_field(
                "cache_ttl_ms must be greater than 0",
                "cache_ttl_ms",
            ));
        }
        if self.cache_max_size == 0 {
            return Err(OrchestratorError::configuration_field(
                "cache_max_size must be greater than 0",
                "cache_max_size",
            ));
        }
        Ok(())
    }

    /// Parse a YAML document; absent fields keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::io(format!("read config {}", path.display()), e)
        })?;
        let config = Self::from_yaml_str(&content)?;
        info!("Loaded orchestrator configuration from {}", path.display());
        Ok(config)
    }
}

/// Builder for OrchestratorConfig
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn cache_max_size(mut self, max_size: usize) -> Self {
        self.config.cache_max_size = max_size;
        self
    }

    pub fn scheduling(mut self, scheduling: Scheduling) -> Self {
        self.config.scheduling = scheduling;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
