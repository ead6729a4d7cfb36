use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::coverage::{FallbackPolicy, ResolveOptions, ScoringPolicy};
use crate::grouping::MetroRules;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("scoring threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
    #[error("simplify tolerance {0} must be a positive number of meters")]
    InvalidSimplify(f64),
    #[error("runtime.max_parallel must be at least 1")]
    ZeroParallelism,
    #[error("runtime.timeout_secs must be at least 1")]
    ZeroTimeout,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scoring: ScoringPolicy,
    pub clip: ClipConfig,
    pub grouping: MetroRules,
    pub display: DisplayConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ClipConfig {
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Simplification tolerance for output geometries; none keeps them as clipped
    pub simplify_meters: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Per-place time limit
    pub timeout_secs: u64,
    pub max_parallel: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_parallel: 4,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("Invalid config file")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scoring.is_valid() {
            return Err(ConfigError::InvalidThreshold(self.scoring.threshold));
        }
        if let Some(meters) = self.display.simplify_meters {
            if !(meters.is_finite() && meters > 0.0) {
                return Err(ConfigError::InvalidSimplify(meters));
            }
        }
        if self.runtime.max_parallel == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        if self.runtime.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Pipeline options, with the threshold environment override applied.
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            scoring: self.scoring.with_env_override(),
            fallback: self.clip.fallback,
        }
    }
}
