// Execution Context
// Immutable description of where in a running plan a node sits

use crate::execution::models::LoopMetadata;

use serde::{Deserialize, Serialize};

/// How the plan is being executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Normal,
    /// Selective replay of previously executed loop iterations
    PostExecutionRollback,
}

/// Kind of plan node a level represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Pipeline,
    Stage,
    StepGroup,
    Step,
}

/// A level's role in the nesting stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope")]
pub enum ScopeKind {
    Node { kind: NodeKind },
    /// Looping/matrix node whose only job is to fan out into copies of `wraps`
    Strategy { wraps: NodeKind },
}

/// One entry of the nesting stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub candidate_id: String,
    pub execution_id: String,
    pub scope: ScopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_metadata: Option<LoopMetadata>,
}

impl Level {
    pub fn node(
        candidate_id: impl Into<String>,
        execution_id: impl Into<String>,
        kind: NodeKind,
    ) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            execution_id: execution_id.into(),
            scope: ScopeKind::Node { kind },
            loop_metadata: None,
        }
    }

    pub fn strategy(
        candidate_id: impl Into<String>,
        execution_id: impl Into<String>,
        wraps: NodeKind,
    ) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            execution_id: execution_id.into(),
            scope: ScopeKind::Strategy { wraps },
            loop_metadata: None,
        }
    }

    pub fn with_loop(mut self, loop_metadata: LoopMetadata) -> Self {
        self.loop_metadata = Some(loop_metadata);
        self
    }
}

/// Where in the running plan we are. Produced upstream; only read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Tenant the plan runs for
    pub account_id: String,
    /// Plan run id
    pub plan_run_id: String,
    /// Execution id of the enclosing stage, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_execution_id: Option<String>,
    #[serde(default)]
    pub run_mode: RunMode,
    /// Nesting stack, outermost first
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl ExecutionContext {
    pub fn new(account_id: impl Into<String>, plan_run_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            plan_run_id: plan_run_id.into(),
            stage_execution_id: None,
            run_mode: RunMode::Normal,
            levels: Vec::new(),
        }
    }

    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    pub fn with_stage_execution(mut self, stage_execution_id: impl Into<String>) -> Self {
        self.stage_execution_id = Some(stage_execution_id.into());
        self
    }

    /// Push a nesting level; the last pushed level is the current node
    pub fn with_level(mut self, level: Level) -> Self {
        if let ScopeKind::Node {
            kind: NodeKind::Stage,
        } = level.scope
        {
            self.stage_execution_id = Some(level.execution_id.clone());
        }
        self.levels.push(level);
        self
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn current_execution_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.execution_id.as_str())
    }

    pub fn current_candidate_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.candidate_id.as_str())
    }

    /// Whether the current node is a loop/strategy scope
    pub fn is_loop_scope(&self) -> bool {
        matches!(
            self.current_level().map(|l| l.scope),
            Some(ScopeKind::Strategy { .. })
        )
    }

    /// Whether the current node is a strategy wrapping a whole stage
    pub fn is_stage_strategy(&self) -> bool {
        matches!(
            self.current_level().map(|l| l.scope),
            Some(ScopeKind::Strategy {
                wraps: NodeKind::Stage
            })
        )
    }

    /// Loop positions of every enclosing iteration, outermost first
    pub fn iteration_path(&self) -> Vec<&LoopMetadata> {
        self.levels
            .iter()
            .filter_map(|l| l.loop_metadata.as_ref())
            .collect()
    }

    pub fn is_rollback(&self) -> bool {
        self.run_mode == RunMode::PostExecutionRollback
    }

    /// Scope used to key barrier instances: the stage execution when known,
    /// otherwise the current node itself
    pub fn barrier_scope_id(&self) -> Option<&str> {
        self.stage_execution_id
            .as_deref()
            .or_else(|| self.current_execution_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_strategy_context() -> ExecutionContext {
        ExecutionContext::new("acct", "plan-1")
            .with_level(Level::node("pipeline", "pe-1", NodeKind::Pipeline))
            .with_level(Level::strategy("deploy_strategy", "se-1", NodeKind::Stage))
    }

    #[test]
    fn test_current_level_is_last_pushed() {
        let ctx = stage_strategy_context();
        assert_eq!(ctx.current_execution_id(), Some("se-1"));
        assert_eq!(ctx.current_candidate_id(), Some("deploy_strategy"));
        assert!(ctx.is_loop_scope());
        assert!(ctx.is_stage_strategy());
    }

    #[test]
    fn test_step_group_strategy_is_loop_but_not_stage_strategy() {
        let ctx = ExecutionContext::new("acct", "plan-1")
            .with_level(Level::node("build", "st-1", NodeKind::Stage))
            .with_level(Level::strategy("sg_strategy", "sge-1", NodeKind::StepGroup));
        assert!(ctx.is_loop_scope());
        assert!(!ctx.is_stage_strategy());
        assert_eq!(ctx.stage_execution_id.as_deref(), Some("st-1"));
        assert_eq!(ctx.barrier_scope_id(), Some("st-1"));
    }

    #[test]
    fn test_plain_node_is_not_loop_scope() {
        let ctx = ExecutionContext::new("acct", "plan-1")
            .with_level(Level::node("build", "st-1", NodeKind::Stage));
        assert!(!ctx.is_loop_scope());
        assert!(ctx.iteration_path().is_empty());
    }

    #[test]
    fn test_iteration_path_collects_nested_loops() {
        let ctx = ExecutionContext::new("acct", "plan-1")
            .with_level(Level::node("build", "st-1", NodeKind::Stage).with_loop(LoopMetadata::new(0, 2)))
            .with_level(Level::node("step", "s-1", NodeKind::Step).with_loop(LoopMetadata::new(3, 4)));
        let path = ctx.iteration_path();
        assert_eq!(path.len(), 2);
        assert_eq!(path[1].iteration_index, 3);
    }
}
