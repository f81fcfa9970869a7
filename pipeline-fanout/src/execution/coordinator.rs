// Fan-out Coordinator
// Spawns a parent's children under a concurrency window and registers the join

use crate::config::CoordinatorConfig;
use crate::error::{FanOutError, FanOutResult};
use crate::execution::barrier::{BarrierExpandObserver, BarrierExpansionRequest, BarrierSubject};
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::ConcurrencyCursor;
use crate::execution::events::{EventSender, FanOutEvent, ProgressSender};
use crate::execution::limiter::{ConcurrencyLimiter, TierCeiling};
use crate::execution::models::{
    ChildContext, ChildOutcome, ChildSpec, ParentRecordedResponse, SelectedChild,
};
use crate::execution::selector::{ChildSelector, RollbackContext, RollbackTarget};
use crate::notify::{
    ContinuationCallback, FanOutCallback, FiredCallback, JoinCallback, NotificationEngine,
};
use crate::stores::{ChildExecutionStore, CursorStore, ParentExecutionStore};

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Intent emitted by a parent node that wants to fan out
#[derive(Clone)]
pub struct SpawnRequest {
    /// Position of the parent; its current level is the parent node
    pub context: ExecutionContext,
    /// Every prospective child, in launch order
    pub candidates: Vec<ChildSpec>,
    /// Author-requested concurrency (0 = unset)
    pub max_concurrency: u64,
    /// Keep promoting queued children after a sibling failed
    pub proceed_if_failed: bool,
    pub rollback: Arc<dyn RollbackContext>,
    /// Ids minted by an earlier attempt of the same spawn
    pub execution_ids: Option<Vec<String>>,
}

impl SpawnRequest {
    pub fn new(context: ExecutionContext, candidates: Vec<ChildSpec>) -> Self {
        Self {
            context,
            candidates,
            max_concurrency: 0,
            proceed_if_failed: false,
            rollback: Arc::new(RollbackTarget::new()),
            execution_ids: None,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: u64) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_proceed_if_failed(mut self, proceed_if_failed: bool) -> Self {
        self.proceed_if_failed = proceed_if_failed;
        self
    }

    pub fn with_rollback(mut self, rollback: Arc<dyn RollbackContext>) -> Self {
        self.rollback = rollback;
        self
    }

    /// Reuse execution ids from a previous attempt, one per candidate
    pub fn with_execution_ids(mut self, execution_ids: Vec<String>) -> Self {
        self.execution_ids = Some(execution_ids);
        self
    }
}

/// What a spawn did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// Nothing selected; the parent was resumed with an empty result
    ShortCircuited,
    Spawned {
        /// Selected execution ids, in launch order
        selected: Vec<String>,
        window: usize,
        started: Vec<String>,
        queued: Vec<String>,
        /// First-window children that could not be created or started
        failed: Vec<String>,
        join_subscription: String,
    },
}

/// Fan-out/join coordinator.
///
/// Runs to completion on each event (spawn, continuation, join) and keeps no
/// state between them; the persisted cursor is the only shared record.
pub struct FanOutCoordinator {
    pub(crate) config: CoordinatorConfig,
    pub(crate) limiter: ConcurrencyLimiter,
    pub(crate) cursors: Arc<dyn CursorStore>,
    pub(crate) children: Arc<dyn ChildExecutionStore>,
    pub(crate) parents: Arc<dyn ParentExecutionStore>,
    pub(crate) notifier: Arc<dyn NotificationEngine>,
    pub(crate) barriers: BarrierSubject,
    /// Progress event sender
    pub(crate) event_tx: Option<ProgressSender>,
}

impl FanOutCoordinator {
    pub fn new(
        cursors: Arc<dyn CursorStore>,
        children: Arc<dyn ChildExecutionStore>,
        parents: Arc<dyn ParentExecutionStore>,
        notifier: Arc<dyn NotificationEngine>,
    ) -> Self {
        let config = CoordinatorConfig::default();
        let limiter = ConcurrencyLimiter::new(
            Arc::new(config.tier_ceilings.clone()),
            config.fallback_concurrency,
        );

        Self {
            config,
            limiter,
            cursors,
            children,
            parents,
            notifier,
            barriers: BarrierSubject::new(),
            event_tx: None,
        }
    }

    /// Set coordinator configuration. Resets the tier ceiling to the
    /// configured policy.
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.limiter = ConcurrencyLimiter::new(
            Arc::new(config.tier_ceilings.clone()),
            config.fallback_concurrency,
        );
        self.config = config;
        self
    }

    /// Replace the tier ceiling policy
    pub fn with_tier_ceiling(mut self, ceiling: Arc<dyn TierCeiling>) -> Self {
        self.limiter = ConcurrencyLimiter::new(ceiling, self.config.fallback_concurrency);
        self
    }

    pub fn with_barrier_observer(mut self, observer: Arc<dyn BarrierExpandObserver>) -> Self {
        self.barriers.register(observer);
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Fan out the current node of `request.context` into its children.
    ///
    /// The cursor is persisted before any child exists; failing to persist it
    /// is the only error that aborts the spawn. A child that cannot be created
    /// or started is reported as failed so the join still fires.
    pub async fn spawn(&self, request: SpawnRequest) -> FanOutResult<SpawnOutcome> {
        let SpawnRequest {
            context,
            candidates,
            max_concurrency,
            proceed_if_failed,
            rollback,
            execution_ids,
        } = request;

        let parent = context.current_level().cloned().ok_or_else(|| {
            FanOutError::InvalidRequest("execution context has no current node".to_string())
        })?;
        let parent_id = parent.execution_id.clone();

        let ids = match execution_ids {
            Some(ids) if ids.len() == candidates.len() => ids,
            Some(ids) => {
                return Err(FanOutError::InvalidRequest(format!(
                    "{} execution ids supplied for {} candidates",
                    ids.len(),
                    candidates.len()
                )))
            }
            None => candidates
                .iter()
                .map(|_| Uuid::new_v4().to_string())
                .collect(),
        };

        let window = self
            .limiter
            .effective_concurrency(&context.account_id, candidates.len(), max_concurrency)
            .await;

        if !candidates.is_empty()
            && context.is_loop_scope()
            && self.config.barrier_expansion.enabled_for(&context.account_id)
        {
            let expansion = BarrierExpansionRequest {
                plan_run_id: context.plan_run_id.clone(),
                parent_execution_id: parent_id.clone(),
                parent_candidate_id: parent.candidate_id.clone(),
                child_candidate_ids: candidates
                    .iter()
                    .map(|c| c.candidate_node_id.clone())
                    .collect(),
                child_execution_ids: ids.clone(),
                scope_id: context
                    .barrier_scope_id()
                    .unwrap_or(&parent_id)
                    .to_string(),
                window,
            };
            let observers = self.barriers.fire_inform(&expansion).await;
            self.event_tx.send_event(FanOutEvent::BarriersExpanded {
                parent_execution_id: parent_id.clone(),
                observers,
                children: candidates.len(),
            });
        }

        let selected_specs = match ChildSelector::select(&context, &candidates, rollback.as_ref()).await
        {
            Ok(selected) => selected,
            Err(e) => {
                warn!(parent = %parent_id, error = %e, "child selection failed, selecting nothing");
                Vec::new()
            }
        };
        let selected: Vec<SelectedChild> = selected_specs
            .into_iter()
            .zip(&ids)
            .map(|(spec, id)| SelectedChild::new(id.clone(), spec))
            .collect();

        if selected.is_empty() {
            return self.short_circuit(&parent_id, candidates.len()).await;
        }

        let cursor = self
            .persist_cursor(&parent_id, &selected, window)
            .await
            .map_err(|e| as_cursor_error(&parent_id, e))?;
        let first_len = cursor.initial_window();

        info!(
            parent = %parent_id,
            candidates = candidates.len(),
            selected = selected.len(),
            window = first_len,
            "fanning out"
        );
        self.event_tx.send_event(FanOutEvent::FanOutStarted {
            parent_execution_id: parent_id.clone(),
            total_candidates: candidates.len(),
            selected: selected.len(),
            window: first_len,
        });

        // Create the whole first window before anything is started
        let first_window = cursor.children[..first_len].to_vec();
        let mut created: Vec<ChildContext> = Vec::with_capacity(first_window.len());
        let mut failures: Vec<(String, String)> = Vec::new();
        for child in &first_window {
            match self.create_child(&parent_id, child).await {
                Ok(ctx) => created.push(ctx),
                Err(message) => failures.push((child.execution_id.clone(), message)),
            }
        }

        let mut started = Vec::with_capacity(created.len());
        for ctx in &created {
            match self.start_child(ctx).await {
                Ok(()) => started.push(ctx.execution_id.clone()),
                Err(message) => failures.push((ctx.execution_id.clone(), message)),
            }
        }

        let queued = &cursor.children[first_len..];
        for (position, child) in queued.iter().enumerate() {
            self.event_tx.send_event(FanOutEvent::ChildQueued {
                parent_execution_id: parent_id.clone(),
                execution_id: child.execution_id.clone(),
                position,
            });
        }

        let mut fired = Vec::new();
        if cursor.len() > first_len {
            let continuation = FanOutCallback::Continuation(ContinuationCallback {
                parent_execution_id: parent_id.clone(),
                plan_run_id: context.plan_run_id.clone(),
                window: first_len,
                proceed_if_failed,
            });
            for child in &first_window {
                let registration = self
                    .notifier
                    .wait_for_all(
                        &self.config.publisher_name,
                        continuation.clone(),
                        std::slice::from_ref(&child.execution_id),
                    )
                    .await?;
                fired.extend(registration.fired);
            }
        }

        let selected_ids: Vec<String> = selected.iter().map(|c| c.execution_id.clone()).collect();
        if selected.len() < candidates.len() {
            self.cursors
                .narrow(&parent_id, &selected_ids)
                .await
                .map_err(|e| as_cursor_error(&parent_id, e))?;
        }

        let join = FanOutCallback::Join(JoinCallback {
            parent_execution_id: parent_id.clone(),
            plan_run_id: context.plan_run_id.clone(),
        });
        let registration = self
            .notifier
            .wait_for_all(&self.config.publisher_name, join, &selected_ids)
            .await?;
        fired.extend(registration.fired);

        let response = ParentRecordedResponse {
            children: selected,
            max_concurrency: cursor.max_concurrency,
            proceed_if_failed,
        };
        if let Err(e) = self.parents.append_child_set(&parent_id, response).await {
            warn!(parent = %parent_id, error = %e, "failed to record child set on parent");
        }

        let failed: Vec<String> = failures.iter().map(|(id, _)| id.clone()).collect();
        for (execution_id, message) in failures {
            fired.extend(
                self.notifier
                    .notify(&execution_id, ChildOutcome::failed(message))
                    .await?,
            );
        }
        self.dispatch(fired).await?;

        Ok(SpawnOutcome::Spawned {
            selected: selected_ids,
            window: first_len,
            started,
            queued: queued.iter().map(|c| c.execution_id.clone()).collect(),
            failed,
            join_subscription: registration.subscription_id,
        })
    }

    /// Save a fresh cursor, or keep the one a previous attempt of the same
    /// spawn already persisted so its progress is not lost
    async fn persist_cursor(
        &self,
        parent_id: &str,
        selected: &[SelectedChild],
        window: usize,
    ) -> FanOutResult<ConcurrencyCursor> {
        if let Some(existing) = self.cursors.load(parent_id).await? {
            let same_children = existing.len() == selected.len()
                && existing
                    .children
                    .iter()
                    .zip(selected)
                    .all(|(a, b)| a.execution_id == b.execution_id);
            if same_children {
                debug!(parent = parent_id, window = existing.window, "resuming spawn from persisted cursor");
                return Ok(existing);
            }
        }

        let cursor = ConcurrencyCursor::new(selected.to_vec(), window);
        self.cursors.save(parent_id, &cursor).await?;
        Ok(cursor)
    }

    async fn short_circuit(&self, parent_id: &str, candidates: usize) -> FanOutResult<SpawnOutcome> {
        let reason = if candidates == 0 {
            "no candidates declared"
        } else {
            "selection removed every candidate"
        };
        info!(parent = parent_id, reason, "short-circuiting fan-out");
        self.event_tx
            .send_event(FanOutEvent::short_circuited(parent_id, reason));

        self.parents.resume(parent_id, BTreeMap::new(), false).await?;
        self.event_tx.send_event(FanOutEvent::ParentResumed {
            parent_execution_id: parent_id.to_string(),
            children: 0,
            failed: false,
        });
        Ok(SpawnOutcome::ShortCircuited)
    }

    pub(crate) async fn create_child(
        &self,
        parent_id: &str,
        child: &SelectedChild,
    ) -> Result<ChildContext, String> {
        match self.children.create(parent_id, child).await {
            Ok(ctx) => {
                debug!(parent = parent_id, child = %child.execution_id, "child created");
                self.event_tx.send_event(FanOutEvent::child_created(
                    parent_id,
                    &child.execution_id,
                    &child.candidate_node_id,
                ));
                Ok(ctx)
            }
            Err(e) => Err(self.launch_failed(parent_id, &child.execution_id, e)),
        }
    }

    pub(crate) async fn start_child(&self, ctx: &ChildContext) -> Result<(), String> {
        match self.children.start(ctx).await {
            Ok(()) => {
                debug!(parent = %ctx.parent_execution_id, child = %ctx.execution_id, "child started");
                self.event_tx.send_event(FanOutEvent::child_started(
                    &ctx.parent_execution_id,
                    &ctx.execution_id,
                ));
                Ok(())
            }
            Err(e) => Err(self.launch_failed(&ctx.parent_execution_id, &ctx.execution_id, e)),
        }
    }

    fn launch_failed(&self, parent_id: &str, execution_id: &str, error: FanOutError) -> String {
        let message = error.to_string();
        warn!(parent = parent_id, child = execution_id, error = %message, "child launch failed");
        self.event_tx.send_event(FanOutEvent::launch_failed(
            parent_id,
            execution_id,
            &message,
        ));
        message
    }

    /// Record a child's outcome and run every callback it completes
    pub async fn handle_notification(
        &self,
        execution_id: &str,
        outcome: ChildOutcome,
    ) -> FanOutResult<()> {
        let fired = self.notifier.notify(execution_id, outcome).await?;
        self.dispatch(fired).await
    }

    /// Run fired callbacks until none are left. Callbacks registered by other
    /// publishers are skipped. Every callback is attempted; the first error is
    /// returned.
    pub async fn dispatch(&self, fired: Vec<FiredCallback>) -> FanOutResult<()> {
        let mut queue: VecDeque<FiredCallback> = fired.into();
        let mut first_error = None;

        while let Some(next) = queue.pop_front() {
            if next.publisher != self.config.publisher_name {
                debug!(publisher = %next.publisher, subscription = %next.subscription_id, "skipping foreign callback");
                continue;
            }

            let result = match &next.callback {
                FanOutCallback::Continuation(callback) => {
                    self.on_child_finished(callback, &next.outcomes).await
                }
                FanOutCallback::Join(callback) => self
                    .on_all_finished(callback, &next.outcomes)
                    .await
                    .map(|()| Vec::new()),
            };

            match result {
                Ok(more) => queue.extend(more),
                Err(e) => {
                    warn!(
                        parent = next.callback.parent_execution_id(),
                        subscription = %next.subscription_id,
                        error = %e,
                        "callback failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn as_cursor_error(parent_id: &str, error: FanOutError) -> FanOutError {
    match error {
        FanOutError::CursorPersistence { .. } => error,
        other => FanOutError::cursor(parent_id, other.to_string()),
    }
}
