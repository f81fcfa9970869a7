// Fan-out Callbacks
// Continuation, join, cancellation and recovery handlers

use crate::error::FanOutResult;
use crate::execution::cursor::{CursorAdvance, RecoveryPlan};
use crate::execution::coordinator::FanOutCoordinator;
use crate::execution::events::{EventSender, FanOutEvent};
use crate::execution::models::{ChildOutcome, SelectedChild};
use crate::notify::{ContinuationCallback, FanOutCallback, FiredCallback, JoinCallback};

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl FanOutCoordinator {
    /// A windowed child finished: advance the cursor and promote at most one
    /// queued child per finished child.
    ///
    /// Safe under redelivery. The cursor keeps the effect of each applied
    /// completion until it is settled here, so a delivery that failed halfway
    /// is finished by the next one; after that, repeats start nothing.
    pub async fn on_child_finished(
        &self,
        callback: &ContinuationCallback,
        outcomes: &BTreeMap<String, ChildOutcome>,
    ) -> FanOutResult<Vec<FiredCallback>> {
        let parent_id = &callback.parent_execution_id;
        let mut fired = Vec::new();

        for (child_id, outcome) in outcomes {
            let advance = self
                .cursors
                .advance(
                    parent_id,
                    child_id,
                    outcome.is_failure(),
                    callback.proceed_if_failed,
                )
                .await?;

            match advance {
                CursorAdvance::Promote {
                    next,
                    remaining_queued,
                } => {
                    debug!(parent = %parent_id, child = %next.execution_id, after = %child_id, "promoting queued child");
                    self.event_tx.send_event(FanOutEvent::ChildPromoted {
                        parent_execution_id: parent_id.clone(),
                        execution_id: next.execution_id.clone(),
                        after: child_id.clone(),
                    });
                    fired.extend(self.launch_promoted(callback, next, remaining_queued).await?);
                    self.cursors.settle(parent_id, child_id).await?;
                }
                CursorAdvance::Halted { skipped } => {
                    info!(parent = %parent_id, child = %child_id, skipped = skipped.len(), "child failed, halting promotion");
                    self.event_tx.send_event(FanOutEvent::PromotionHalted {
                        parent_execution_id: parent_id.clone(),
                        skipped: skipped.len(),
                        reason: format!("{} failed", child_id),
                    });
                    let reason = format!("sibling {} failed", child_id);
                    for id in &skipped {
                        fired.extend(
                            self.notifier
                                .notify(id, ChildOutcome::skipped(reason.as_str()))
                                .await?,
                        );
                    }
                    self.cursors.settle(parent_id, child_id).await?;
                }
                CursorAdvance::Duplicate => {
                    debug!(parent = %parent_id, child = %child_id, "duplicate completion ignored");
                    self.event_tx.send_event(FanOutEvent::DuplicateCallback {
                        parent_execution_id: parent_id.clone(),
                        execution_id: child_id.clone(),
                    });
                }
                CursorAdvance::Drained => {
                    debug!(parent = %parent_id, child = %child_id, "no queued children left");
                }
                CursorAdvance::Inactive => {
                    debug!(parent = %parent_id, child = %child_id, "cursor inactive");
                }
            }
        }

        Ok(fired)
    }

    /// Create and start a promoted child. While children remain queued behind
    /// it, it gets its own continuation.
    async fn launch_promoted(
        &self,
        callback: &ContinuationCallback,
        child: SelectedChild,
        remaining_queued: usize,
    ) -> FanOutResult<Vec<FiredCallback>> {
        let parent_id = &callback.parent_execution_id;
        let launched = match self.create_child(parent_id, &child).await {
            Ok(ctx) => self.start_child(&ctx).await,
            Err(message) => Err(message),
        };

        let mut fired = Vec::new();
        if remaining_queued > 0 {
            let registration = self
                .notifier
                .wait_for_all(
                    &self.config.publisher_name,
                    FanOutCallback::Continuation(callback.clone()),
                    std::slice::from_ref(&child.execution_id),
                )
                .await?;
            fired.extend(registration.fired);
        }

        if let Err(message) = launched {
            fired.extend(
                self.notifier
                    .notify(&child.execution_id, ChildOutcome::failed(message))
                    .await?,
            );
        }
        Ok(fired)
    }

    /// Every selected child finished: resume the parent. The parent store
    /// ignores a second resume, so redelivery is harmless.
    pub async fn on_all_finished(
        &self,
        callback: &JoinCallback,
        outcomes: &BTreeMap<String, ChildOutcome>,
    ) -> FanOutResult<()> {
        let parent_id = &callback.parent_execution_id;
        let failed = outcomes.values().any(ChildOutcome::is_failure);

        self.parents
            .resume(parent_id, outcomes.clone(), failed)
            .await?;

        info!(parent = %parent_id, children = outcomes.len(), failed, "parent resumed");
        self.event_tx.send_event(FanOutEvent::ParentResumed {
            parent_execution_id: parent_id.clone(),
            children: outcomes.len(),
            failed,
        });

        let finished: Vec<String> = outcomes.keys().cloned().collect();
        if let Err(e) = self.notifier.forget(&finished).await {
            warn!(parent = %parent_id, error = %e, "failed to release child outcomes");
        }
        Ok(())
    }

    /// Stop promoting queued children of a parent. Queued children are
    /// reported as aborted; children already started keep running and are
    /// left to the node-execution infrastructure. Returns the aborted ids.
    pub async fn cancel(&self, parent_execution_id: &str) -> FanOutResult<Vec<String>> {
        let aborted = self.cursors.halt(parent_execution_id).await?;
        if aborted.is_empty() {
            debug!(parent = parent_execution_id, "nothing queued to cancel");
            return Ok(aborted);
        }

        warn!(parent = parent_execution_id, aborted = aborted.len(), "fan-out cancelled");
        self.event_tx.send_event(FanOutEvent::FanOutCancelled {
            parent_execution_id: parent_execution_id.to_string(),
            aborted: aborted.len(),
        });

        let mut fired = Vec::new();
        for id in &aborted {
            fired.extend(
                self.notifier
                    .notify(id, ChildOutcome::aborted("parent cancelled"))
                    .await?,
            );
        }
        self.dispatch(fired).await?;
        Ok(aborted)
    }

    /// What is left to drive for a parent, read from its persisted cursor
    pub async fn recover(&self, parent_execution_id: &str) -> FanOutResult<Option<RecoveryPlan>> {
        let plan = self
            .cursors
            .load(parent_execution_id)
            .await?
            .map(|cursor| cursor.recovery_plan());

        if let Some(plan) = &plan {
            debug!(
                parent = parent_execution_id,
                in_flight = plan.in_flight.len(),
                queued = plan.queued.len(),
                halted = plan.halted,
                "recovery plan"
            );
        }
        Ok(plan)
    }
}
