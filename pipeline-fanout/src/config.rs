// Coordinator Configuration
// Publisher name, fallback window, feature toggles and tier policy

use crate::error::{FanOutError, FanOutResult};
use crate::execution::limiter::TierCeilings;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-tenant feature toggle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggle {
    /// Enabled for every tenant
    pub enabled: bool,
    /// Tenants enabled individually
    pub accounts: Vec<String>,
}

impl FeatureToggle {
    pub fn enabled_for(&self, account_id: &str) -> bool {
        self.enabled || self.accounts.iter().any(|a| a == account_id)
    }
}

/// Configuration for the fan-out coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Name callbacks are registered under with the notification engine
    pub publisher_name: String,
    /// Window used when the tier ceiling cannot be resolved
    pub fallback_concurrency: usize,
    /// Expand barriers declared inside looping scopes
    pub barrier_expansion: FeatureToggle,
    pub tier_ceilings: TierCeilings,
    /// Directory for the file-backed cursor store
    pub state_dir: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let state_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pipeline-fanout")
            .join("cursors");

        Self {
            publisher_name: "pipeline-fanout".to_string(),
            fallback_concurrency: 1,
            barrier_expansion: FeatureToggle::default(),
            tier_ceilings: TierCeilings::default(),
            state_dir,
        }
    }
}

impl CoordinatorConfig {
    /// Parse a YAML document; missing keys take their defaults
    pub fn from_yaml_str(source: &str) -> FanOutResult<Self> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> FanOutResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&source)
    }

    pub fn validate(&self) -> FanOutResult<()> {
        if self.publisher_name.trim().is_empty() {
            return Err(FanOutError::Config(
                "publisher_name must not be empty".to_string(),
            ));
        }
        if self.fallback_concurrency == 0 {
            return Err(FanOutError::Config(
                "fallback_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
