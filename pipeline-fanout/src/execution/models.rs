// Fan-out Data Model
// Child specifications, launched children and their outcomes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position of a child inside its loop/strategy scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopMetadata {
    /// Zero-based iteration index
    pub iteration_index: u32,
    /// Number of iterations the loop declared
    pub total_iterations: u32,
    /// Axis values for matrix iterations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matrix_values: BTreeMap<String, String>,
    /// Item value for repeat/items iterations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
}

impl LoopMetadata {
    pub fn new(iteration_index: u32, total_iterations: u32) -> Self {
        Self {
            iteration_index,
            total_iterations,
            matrix_values: BTreeMap::new(),
            item: None,
        }
    }

    pub fn with_matrix_value(mut self, axis: impl Into<String>, value: impl Into<String>) -> Self {
        self.matrix_values.insert(axis.into(), value.into());
        self
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }
}

/// A prospective child declared by the parent node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSpec {
    /// Plan node the child executes
    pub candidate_node_id: String,
    /// Loop position, absent for plain (non-looping) children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_metadata: Option<LoopMetadata>,
}

impl ChildSpec {
    pub fn new(candidate_node_id: impl Into<String>) -> Self {
        Self {
            candidate_node_id: candidate_node_id.into(),
            loop_metadata: None,
        }
    }

    pub fn with_loop(mut self, loop_metadata: LoopMetadata) -> Self {
        self.loop_metadata = Some(loop_metadata);
        self
    }
}

/// A child that survived selection, paired with its execution id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedChild {
    pub execution_id: String,
    pub candidate_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_metadata: Option<LoopMetadata>,
}

impl SelectedChild {
    pub fn new(execution_id: impl Into<String>, spec: ChildSpec) -> Self {
        Self {
            execution_id: execution_id.into(),
            candidate_node_id: spec.candidate_node_id,
            loop_metadata: spec.loop_metadata,
        }
    }
}

/// Handle returned by the execution store once a child record exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildContext {
    pub parent_execution_id: String,
    pub execution_id: String,
    pub candidate_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_metadata: Option<LoopMetadata>,
}

/// Terminal status of a child as seen by the join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    Succeeded,
    Failed,
    /// Never launched because promotion halted after a failure
    Skipped,
    /// Never launched because the parent was cancelled
    Aborted,
}

/// Outcome reported for a finished child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildOutcome {
    pub status: ChildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChildOutcome {
    pub fn succeeded() -> Self {
        Self {
            status: ChildStatus::Succeeded,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ChildStatus::Failed,
            message: Some(message.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: ChildStatus::Skipped,
            message: Some(reason.into()),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            status: ChildStatus::Aborted,
            message: Some(reason.into()),
        }
    }

    /// Failed and aborted children fail the parent; skipped ones do not.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, ChildStatus::Failed | ChildStatus::Aborted)
    }
}

/// Annotation recorded on the parent describing its (post-filter) child set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRecordedResponse {
    pub children: Vec<SelectedChild>,
    pub max_concurrency: usize,
    pub proceed_if_failed: bool,
}

impl ParentRecordedResponse {
    /// Merge another response into this one, keeping first-seen children.
    pub fn merge(&mut self, other: ParentRecordedResponse) {
        for child in other.children {
            if !self
                .children
                .iter()
                .any(|c| c.execution_id == child.execution_id)
            {
                self.children.push(child);
            }
        }
        self.max_concurrency = other.max_concurrency;
        self.proceed_if_failed = other.proceed_if_failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_failure_classification() {
        assert!(!ChildOutcome::succeeded().is_failure());
        assert!(ChildOutcome::failed("exit 1").is_failure());
        assert!(ChildOutcome::aborted("cancelled").is_failure());
        assert!(!ChildOutcome::skipped("halted").is_failure());
    }

    #[test]
    fn test_recorded_response_merge_is_add_to_set() {
        let a = SelectedChild::new("e1", ChildSpec::new("stage"));
        let b = SelectedChild::new("e2", ChildSpec::new("stage"));

        let mut recorded = ParentRecordedResponse {
            children: vec![a.clone()],
            max_concurrency: 2,
            proceed_if_failed: false,
        };
        recorded.merge(ParentRecordedResponse {
            children: vec![a, b],
            max_concurrency: 2,
            proceed_if_failed: false,
        });

        let ids: Vec<_> = recorded
            .children
            .iter()
            .map(|c| c.execution_id.as_str())
            .collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[test]
    fn test_loop_metadata_serialization_omits_empty_fields() {
        let json = serde_json::to_string(&LoopMetadata::new(1, 3)).unwrap();
        assert_eq!(json, r#"{"iterationIndex":1,"totalIterations":3}"#);
    }
}
