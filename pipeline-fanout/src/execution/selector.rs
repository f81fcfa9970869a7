// Child Selection
// Narrows the candidate list during selective replay (post-execution rollback)

use crate::error::FanOutResult;
use crate::execution::context::ExecutionContext;
use crate::execution::models::{ChildSpec, LoopMetadata};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One iteration that must be replayed for a looped stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackEntry {
    /// Candidate id of the looping node wrapping the stage
    pub stage_id: String,
    pub loop_metadata: LoopMetadata,
}

/// Overrides for a rollback run, possibly several per stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackTarget {
    #[serde(default)]
    pub entries: Vec<RollbackEntry>,
}

impl RollbackTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, stage_id: impl Into<String>, loop_metadata: LoopMetadata) -> Self {
        self.entries.push(RollbackEntry {
            stage_id: stage_id.into(),
            loop_metadata,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only source of rollback overrides
#[async_trait::async_trait]
pub trait RollbackContext: Send + Sync {
    /// Every override known for the current plan run
    async fn entries(&self) -> FanOutResult<Vec<RollbackEntry>>;

    /// Overrides for one stage, in recorded order
    async fn lookup(&self, stage_id: &str) -> FanOutResult<Vec<LoopMetadata>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.stage_id == stage_id)
            .map(|e| e.loop_metadata)
            .collect())
    }
}

#[async_trait::async_trait]
impl RollbackContext for RollbackTarget {
    async fn entries(&self) -> FanOutResult<Vec<RollbackEntry>> {
        Ok(self.entries.clone())
    }
}

/// Prefers the plan-level rollback record and falls back to the overrides
/// carried with the execution when the plan-level record is empty
pub struct FallbackRollbackContext {
    primary: Arc<dyn RollbackContext>,
    fallback: RollbackTarget,
}

impl FallbackRollbackContext {
    pub fn new(primary: Arc<dyn RollbackContext>, fallback: RollbackTarget) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait::async_trait]
impl RollbackContext for FallbackRollbackContext {
    async fn entries(&self) -> FanOutResult<Vec<RollbackEntry>> {
        let primary = self.primary.entries().await?;
        if primary.is_empty() {
            return Ok(self.fallback.entries.clone());
        }
        Ok(primary)
    }
}

/// Filters candidates down to the children that must actually run
pub struct ChildSelector;

impl ChildSelector {
    /// Select the children to launch.
    ///
    /// Normal runs and non-stage scopes get the candidates back unchanged. In
    /// rollback mode at a stage strategy, only the recorded iterations are
    /// replayed: child `i` keeps candidate `i`'s node id but takes the `i`-th
    /// override as its loop metadata. A stage with no recorded override yields
    /// no children, so the fan-out becomes a no-op.
    pub async fn select(
        context: &ExecutionContext,
        candidates: &[ChildSpec],
        rollback: &dyn RollbackContext,
    ) -> FanOutResult<Vec<ChildSpec>> {
        if !context.is_rollback() || !context.is_stage_strategy() {
            return Ok(candidates.to_vec());
        }

        let stage_id = context.current_candidate_id().unwrap_or_default();
        let overrides = rollback.lookup(stage_id).await?;
        debug!(
            stage = stage_id,
            overrides = overrides.len(),
            candidates = candidates.len(),
            "selecting rollback iterations"
        );

        Ok(overrides
            .into_iter()
            .zip(candidates)
            .map(|(loop_metadata, candidate)| ChildSpec {
                candidate_node_id: candidate.candidate_node_id.clone(),
                loop_metadata: Some(loop_metadata),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FanOutError;
    use crate::execution::context::{Level, NodeKind, RunMode};
    use crate::execution::strategy::LoopExpander;

    fn strategy_context(run_mode: RunMode, wraps: NodeKind) -> ExecutionContext {
        ExecutionContext::new("acct", "plan-1")
            .with_run_mode(run_mode)
            .with_level(Level::node("pipeline", "pe-1", NodeKind::Pipeline))
            .with_level(Level::strategy("deploy_strategy", "se-1", wraps))
    }

    struct BrokenRollback;

    #[async_trait::async_trait]
    impl RollbackContext for BrokenRollback {
        async fn entries(&self) -> FanOutResult<Vec<RollbackEntry>> {
            Err(FanOutError::RollbackLookup {
                stage_id: "deploy_strategy".to_string(),
                message: "metadata store offline".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_normal_mode_is_identity() {
        let ctx = strategy_context(RunMode::Normal, NodeKind::Stage);
        let candidates = LoopExpander::parallel("deploy", 3);
        let target = RollbackTarget::new().with_override("deploy_strategy", LoopMetadata::new(1, 3));

        let selected = ChildSelector::select(&ctx, &candidates, &target).await.unwrap();
        assert_eq!(selected, candidates);
    }

    #[tokio::test]
    async fn test_rollback_replaces_loop_metadata_positionally() {
        let ctx = strategy_context(RunMode::PostExecutionRollback, NodeKind::Stage);
        let candidates = LoopExpander::parallel("deploy", 5);
        let target = RollbackTarget::new()
            .with_override("deploy_strategy", LoopMetadata::new(3, 5))
            .with_override("other_stage", LoopMetadata::new(0, 2))
            .with_override("deploy_strategy", LoopMetadata::new(4, 5));

        let selected = ChildSelector::select(&ctx, &candidates, &target).await.unwrap();

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].loop_metadata, Some(LoopMetadata::new(3, 5)));
        assert_eq!(selected[1].loop_metadata, Some(LoopMetadata::new(4, 5)));
        assert_eq!(selected[0].candidate_node_id, candidates[0].candidate_node_id);
    }

    #[tokio::test]
    async fn test_rollback_caps_at_candidate_count() {
        let ctx = strategy_context(RunMode::PostExecutionRollback, NodeKind::Stage);
        let candidates = LoopExpander::parallel("deploy", 1);
        let target = RollbackTarget::new()
            .with_override("deploy_strategy", LoopMetadata::new(0, 1))
            .with_override("deploy_strategy", LoopMetadata::new(0, 1));

        let selected = ChildSelector::select(&ctx, &candidates, &target).await.unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_without_matching_stage_selects_nothing() {
        let ctx = strategy_context(RunMode::PostExecutionRollback, NodeKind::Stage);
        let candidates = LoopExpander::parallel("deploy", 3);
        let target = RollbackTarget::new().with_override("other_stage", LoopMetadata::new(0, 1));

        let selected = ChildSelector::select(&ctx, &candidates, &target).await.unwrap();
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_outside_stage_strategy_is_identity() {
        let ctx = strategy_context(RunMode::PostExecutionRollback, NodeKind::StepGroup);
        let candidates = LoopExpander::parallel("group", 3);

        let selected = ChildSelector::select(&ctx, &candidates, &RollbackTarget::new())
            .await
            .unwrap();
        assert_eq!(selected.len(), 3);
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates() {
        let ctx = strategy_context(RunMode::PostExecutionRollback, NodeKind::Stage);
        let candidates = LoopExpander::parallel("deploy", 3);

        let result = ChildSelector::select(&ctx, &candidates, &BrokenRollback).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fallback_context_prefers_primary() {
        let primary = RollbackTarget::new().with_override("s1", LoopMetadata::new(2, 3));
        let fallback = RollbackTarget::new().with_override("s1", LoopMetadata::new(0, 3));

        let ctx = FallbackRollbackContext::new(Arc::new(primary), fallback.clone());
        assert_eq!(ctx.lookup("s1").await.unwrap(), vec![LoopMetadata::new(2, 3)]);

        let empty_primary = FallbackRollbackContext::new(Arc::new(RollbackTarget::new()), fallback);
        assert_eq!(
            empty_primary.lookup("s1").await.unwrap(),
            vec![LoopMetadata::new(0, 3)]
        );
    }
}
