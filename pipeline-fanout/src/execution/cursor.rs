// Concurrency Cursor
// Persisted record of the selected children and how far the window has moved

use crate::execution::models::SelectedChild;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Durable record for one fan-out.
///
/// `window` counts the children that have been let into the window so far;
/// children at positions `window..` are queued. It starts at the effective
/// concurrency and only moves forward as siblings finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyCursor {
    /// Launch plan, in launch order
    pub children: Vec<SelectedChild>,
    pub window: usize,
    /// Concurrency resolved at spawn time
    pub max_concurrency: usize,
    /// Children whose completion has already been applied
    #[serde(default)]
    pub finished: BTreeSet<String>,
    /// Set once promotion stops (failure without proceed, or cancellation)
    #[serde(default)]
    pub halted: bool,
    /// Effects of applied completions that have not been confirmed yet,
    /// keyed by the finished child. Replayed when the completion is redelivered.
    #[serde(default)]
    pub pending: BTreeMap<String, PendingEffect>,
}

/// Follow-up work owed for one applied completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingEffect {
    /// Launch this child and give it a continuation
    Promote { execution_id: String },
    /// Report these queued ids as skipped
    Skip { execution_ids: Vec<String> },
}

/// Result of applying one child completion to the cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorAdvance {
    /// The next queued child entered the window
    Promote {
        next: SelectedChild,
        remaining_queued: usize,
    },
    /// Nothing left in the queue
    Drained,
    /// Promotion stopped; these queued ids will never start
    Halted { skipped: Vec<String> },
    /// Completion already applied
    Duplicate,
    /// No cursor, unknown child, or promotion already halted
    Inactive,
}

/// What a recovery pass needs to re-drive a fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Inside the window but not finished
    pub in_flight: Vec<SelectedChild>,
    /// Not yet let into the window
    pub queued: Vec<SelectedChild>,
    pub halted: bool,
}

impl ConcurrencyCursor {
    /// Build a cursor; the window is clamped to `1..=children.len()`
    pub fn new(children: Vec<SelectedChild>, concurrency: usize) -> Self {
        let window = concurrency.max(1).min(children.len());
        Self {
            children,
            window,
            max_concurrency: concurrency.max(1),
            finished: BTreeSet::new(),
            halted: false,
            pending: BTreeMap::new(),
        }
    }

    pub fn execution_ids(&self) -> Vec<&str> {
        self.children
            .iter()
            .map(|c| c.execution_id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn in_window(&self) -> &[SelectedChild] {
        &self.children[..self.window]
    }

    pub fn queued(&self) -> &[SelectedChild] {
        &self.children[self.window..]
    }

    fn contains(&self, execution_id: &str) -> bool {
        self.children.iter().any(|c| c.execution_id == execution_id)
    }

    /// Children let into the window at spawn time
    pub fn initial_window(&self) -> usize {
        self.max_concurrency.max(1).min(self.children.len())
    }

    /// Apply a child's completion.
    ///
    /// A redelivered completion whose effect was never settled replays that
    /// effect; once settled it is reported as `Duplicate`.
    pub fn advance(
        &mut self,
        finished_child: &str,
        failed: bool,
        proceed_if_failed: bool,
    ) -> CursorAdvance {
        if !self.contains(finished_child) {
            return CursorAdvance::Inactive;
        }
        if !self.finished.insert(finished_child.to_string()) {
            return match self.pending.get(finished_child).cloned() {
                Some(effect) => self.replay(effect),
                None => CursorAdvance::Duplicate,
            };
        }
        if self.halted {
            return CursorAdvance::Inactive;
        }
        if failed && !proceed_if_failed {
            let skipped = self.halt();
            if !skipped.is_empty() {
                self.pending.insert(
                    finished_child.to_string(),
                    PendingEffect::Skip {
                        execution_ids: skipped.clone(),
                    },
                );
            }
            return CursorAdvance::Halted { skipped };
        }
        if self.window < self.children.len() {
            let next = self.children[self.window].clone();
            self.window += 1;
            self.pending.insert(
                finished_child.to_string(),
                PendingEffect::Promote {
                    execution_id: next.execution_id.clone(),
                },
            );
            return CursorAdvance::Promote {
                next,
                remaining_queued: self.children.len() - self.window,
            };
        }
        CursorAdvance::Drained
    }

    fn replay(&self, effect: PendingEffect) -> CursorAdvance {
        match effect {
            PendingEffect::Promote { execution_id } => {
                match self.children.iter().position(|c| c.execution_id == execution_id) {
                    Some(index) => CursorAdvance::Promote {
                        next: self.children[index].clone(),
                        remaining_queued: self.children.len() - index - 1,
                    },
                    None => CursorAdvance::Duplicate,
                }
            }
            PendingEffect::Skip { execution_ids } => CursorAdvance::Halted {
                skipped: execution_ids,
            },
        }
    }

    /// Mark the effect of a completion as done. Returns whether one was pending.
    pub fn settle(&mut self, finished_child: &str) -> bool {
        self.pending.remove(finished_child).is_some()
    }

    /// Stop promotion; returns the ids that will never start
    pub fn halt(&mut self) -> Vec<String> {
        if self.halted {
            return Vec::new();
        }
        self.halted = true;
        self.queued()
            .iter()
            .map(|c| c.execution_id.clone())
            .collect()
    }

    /// Drop children not in `keep`; the window shrinks only if the set does
    pub fn narrow(&mut self, keep: &[String]) {
        let before = self.children.len();
        let window_ids: BTreeSet<String> = self
            .in_window()
            .iter()
            .map(|c| c.execution_id.clone())
            .collect();

        self.children.retain(|c| keep.contains(&c.execution_id));
        if self.children.len() == before {
            return;
        }

        let kept_in_window = self
            .children
            .iter()
            .filter(|c| window_ids.contains(&c.execution_id))
            .count();
        self.window = kept_in_window.min(self.children.len());
        self.finished.retain(|id| keep.contains(id));
    }

    pub fn recovery_plan(&self) -> RecoveryPlan {
        RecoveryPlan {
            in_flight: self
                .in_window()
                .iter()
                .filter(|c| !self.finished.contains(&c.execution_id))
                .cloned()
                .collect(),
            queued: if self.halted {
                Vec::new()
            } else {
                self.queued().to_vec()
            },
            halted: self.halted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::models::ChildSpec;

    fn children(n: usize) -> Vec<SelectedChild> {
        (0..n)
            .map(|i| SelectedChild::new(format!("c{}", i), ChildSpec::new("deploy")))
            .collect()
    }

    #[test]
    fn test_window_is_clamped() {
        assert_eq!(ConcurrencyCursor::new(children(5), 2).window, 2);
        assert_eq!(ConcurrencyCursor::new(children(3), 10).window, 3);
        assert_eq!(ConcurrencyCursor::new(children(3), 0).window, 1);
    }

    #[test]
    fn test_advance_promotes_in_order() {
        let mut cursor = ConcurrencyCursor::new(children(4), 2);

        match cursor.advance("c0", false, true) {
            CursorAdvance::Promote {
                next,
                remaining_queued,
            } => {
                assert_eq!(next.execution_id, "c2");
                assert_eq!(remaining_queued, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        match cursor.advance("c1", false, true) {
            CursorAdvance::Promote { next, .. } => assert_eq!(next.execution_id, "c3"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(cursor.advance("c2", false, true), CursorAdvance::Drained);
        assert_eq!(cursor.window, 4);
    }

    #[test]
    fn test_duplicate_completion_is_absorbed() {
        let mut cursor = ConcurrencyCursor::new(children(4), 2);

        assert!(matches!(
            cursor.advance("c0", false, true),
            CursorAdvance::Promote { .. }
        ));
        assert!(cursor.settle("c0"));
        assert_eq!(cursor.advance("c0", false, true), CursorAdvance::Duplicate);
        assert_eq!(cursor.window, 3);
    }

    #[test]
    fn test_unsettled_promotion_is_replayed() {
        let mut cursor = ConcurrencyCursor::new(children(4), 1);
        cursor.advance("c0", false, true);

        // Redelivery before the promotion was confirmed hands back the same child
        assert_eq!(
            cursor.advance("c0", false, true),
            CursorAdvance::Promote {
                next: cursor.children[1].clone(),
                remaining_queued: 2,
            }
        );
        assert_eq!(cursor.window, 2);

        cursor.settle("c0");
        assert_eq!(cursor.advance("c0", false, true), CursorAdvance::Duplicate);
    }

    #[test]
    fn test_unsettled_halt_is_replayed() {
        let mut cursor = ConcurrencyCursor::new(children(3), 1);
        let first = cursor.advance("c0", true, false);
        assert_eq!(cursor.advance("c0", true, false), first);

        cursor.settle("c0");
        assert_eq!(cursor.advance("c0", true, false), CursorAdvance::Duplicate);
    }

    #[test]
    fn test_failure_without_proceed_halts() {
        let mut cursor = ConcurrencyCursor::new(children(5), 2);

        assert_eq!(
            cursor.advance("c1", true, false),
            CursorAdvance::Halted {
                skipped: vec!["c2".to_string(), "c3".to_string(), "c4".to_string()]
            }
        );
        assert_eq!(cursor.advance("c0", false, false), CursorAdvance::Inactive);
        assert_eq!(cursor.window, 2);
    }

    #[test]
    fn test_failure_with_proceed_keeps_promoting() {
        let mut cursor = ConcurrencyCursor::new(children(3), 1);
        assert!(matches!(
            cursor.advance("c0", true, true),
            CursorAdvance::Promote { .. }
        ));
    }

    #[test]
    fn test_unknown_child_is_inactive() {
        let mut cursor = ConcurrencyCursor::new(children(2), 1);
        assert_eq!(cursor.advance("zz", false, true), CursorAdvance::Inactive);
    }

    #[test]
    fn test_halt_twice_returns_nothing_second_time() {
        let mut cursor = ConcurrencyCursor::new(children(3), 1);
        assert_eq!(cursor.halt().len(), 2);
        assert!(cursor.halt().is_empty());
    }

    #[test]
    fn test_narrow_keeps_order_and_window() {
        let mut cursor = ConcurrencyCursor::new(children(5), 3);
        cursor.narrow(&["c0".to_string(), "c3".to_string()]);

        assert_eq!(cursor.execution_ids(), vec!["c0", "c3"]);
        assert_eq!(cursor.window, 1);

        let unchanged = cursor.clone();
        cursor.narrow(&["c0".to_string(), "c3".to_string()]);
        assert_eq!(cursor, unchanged);
    }

    #[test]
    fn test_recovery_plan() {
        let mut cursor = ConcurrencyCursor::new(children(4), 2);
        cursor.advance("c0", false, true);

        let plan = cursor.recovery_plan();
        let in_flight: Vec<_> = plan.in_flight.iter().map(|c| c.execution_id.as_str()).collect();
        let queued: Vec<_> = plan.queued.iter().map(|c| c.execution_id.as_str()).collect();
        assert_eq!(in_flight, vec!["c1", "c2"]);
        assert_eq!(queued, vec!["c3"]);
    }

    #[test]
    fn test_serialization_round_trip_keeps_progress() {
        let mut cursor = ConcurrencyCursor::new(children(3), 1);
        cursor.advance("c0", false, true);

        let json = serde_json::to_string(&cursor).unwrap();
        let restored: ConcurrencyCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, cursor);
    }
}
