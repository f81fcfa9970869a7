// Concurrency Limiter
// Resolves the effective concurrency window from author request and tenant tier

use crate::error::FanOutResult;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Source of the tenant-tier concurrency ceiling
#[async_trait::async_trait]
pub trait TierCeiling: Send + Sync {
    /// Ceiling for a tenant fanning out into `total_candidates` children
    async fn ceiling(&self, account_id: &str, total_candidates: usize) -> FanOutResult<usize>;
}

/// Licensing edition of a tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edition {
    #[default]
    Free,
    Team,
    Enterprise,
}

/// Edition-based ceiling policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCeilings {
    pub free: usize,
    pub team: usize,
    pub enterprise: usize,
    /// Fan-outs larger than this are capped by `large_fan_out_ceiling`
    pub large_fan_out_threshold: usize,
    pub large_fan_out_ceiling: usize,
    /// Edition per account; unknown accounts are treated as `Free`
    pub account_editions: HashMap<String, Edition>,
}

impl Default for TierCeilings {
    fn default() -> Self {
        Self {
            free: 2,
            team: 50,
            enterprise: 256,
            large_fan_out_threshold: 1000,
            large_fan_out_ceiling: 100,
            account_editions: HashMap::new(),
        }
    }
}

impl TierCeilings {
    pub fn edition_of(&self, account_id: &str) -> Edition {
        self.account_editions
            .get(account_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn with_account(mut self, account_id: impl Into<String>, edition: Edition) -> Self {
        self.account_editions.insert(account_id.into(), edition);
        self
    }
}

#[async_trait::async_trait]
impl TierCeiling for TierCeilings {
    async fn ceiling(&self, account_id: &str, total_candidates: usize) -> FanOutResult<usize> {
        let base = match self.edition_of(account_id) {
            Edition::Free => self.free,
            Edition::Team => self.team,
            Edition::Enterprise => self.enterprise,
        };
        if total_candidates > self.large_fan_out_threshold {
            return Ok(base.min(self.large_fan_out_ceiling));
        }
        Ok(base)
    }
}

/// Same ceiling for every tenant
#[derive(Debug, Clone, Copy)]
pub struct FixedCeiling(pub usize);

#[async_trait::async_trait]
impl TierCeiling for FixedCeiling {
    async fn ceiling(&self, _account_id: &str, _total_candidates: usize) -> FanOutResult<usize> {
        Ok(self.0)
    }
}

/// Combines the author's request with the tier ceiling
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    ceiling: Arc<dyn TierCeiling>,
    fallback: usize,
}

impl ConcurrencyLimiter {
    pub fn new(ceiling: Arc<dyn TierCeiling>, fallback: usize) -> Self {
        Self {
            ceiling,
            fallback: fallback.max(1),
        }
    }

    /// Effective window: `min(requested, ceiling)` when requested, else the
    /// ceiling. Never fails and never returns zero.
    pub async fn effective_concurrency(
        &self,
        account_id: &str,
        total_candidates: usize,
        requested: u64,
    ) -> usize {
        let ceiling = match self.ceiling.ceiling(account_id, total_candidates).await {
            Ok(ceiling) => ceiling,
            Err(e) => {
                warn!(account = account_id, error = %e, fallback = self.fallback, "concurrency ceiling lookup failed");
                self.fallback
            }
        };

        let requested = usize::try_from(requested).unwrap_or(usize::MAX);
        let window = if requested > 0 {
            requested.min(ceiling)
        } else {
            ceiling
        };
        window.max(1)
    }
}
