// Barrier Expansion
// Materializes per-child barrier instances for barriers declared inside a loop

use crate::error::FanOutResult;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Description of a fan-out handed to barrier observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarrierExpansionRequest {
    pub plan_run_id: String,
    pub parent_execution_id: String,
    pub parent_candidate_id: String,
    /// Candidate node ids, one per child (unfiltered)
    pub child_candidate_ids: Vec<String>,
    /// Execution ids, positionally paired with `child_candidate_ids`
    pub child_execution_ids: Vec<String>,
    pub scope_id: String,
    pub window: usize,
}

/// Subscriber reacting to fan-outs of loop scopes
#[async_trait::async_trait]
pub trait BarrierExpandObserver: Send + Sync {
    fn name(&self) -> &str {
        "barrier-observer"
    }

    /// Must be idempotent: the same request may be delivered more than once.
    async fn on_fan_out(&self, request: &BarrierExpansionRequest) -> FanOutResult<()>;
}

/// Ordered list of barrier observers
#[derive(Clone, Default)]
pub struct BarrierSubject {
    observers: Vec<Arc<dyn BarrierExpandObserver>>,
}

impl BarrierSubject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn BarrierExpandObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Inform every observer in registration order. A failing observer is
    /// logged and skipped. Returns how many observers succeeded.
    pub async fn fire_inform(&self, request: &BarrierExpansionRequest) -> usize {
        let mut informed = 0;
        for observer in &self.observers {
            match observer.on_fan_out(request).await {
                Ok(()) => informed += 1,
                Err(e) => warn!(
                    observer = observer.name(),
                    parent = %request.parent_execution_id,
                    error = %e,
                    "barrier observer failed"
                ),
            }
        }
        informed
    }
}

/// One barrier materialized for one child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarrierInstance {
    pub barrier_id: String,
    pub plan_run_id: String,
    pub scope_id: String,
    pub parent_execution_id: String,
    pub child_candidate_id: String,
    pub child_execution_id: String,
    /// Concurrency of the looping node; barriers only release within a window
    pub window: usize,
}

/// In-memory barrier bookkeeping keyed by loop scope
#[derive(Default)]
pub struct BarrierRegistry {
    declarations: RwLock<HashMap<String, BTreeSet<String>>>,
    instances: RwLock<BTreeMap<(String, String), BarrierInstance>>,
}

impl BarrierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a barrier inside the loop scope identified by its candidate id
    pub async fn declare(&self, scope_candidate_id: impl Into<String>, barrier_id: impl Into<String>) {
        self.declarations
            .write()
            .await
            .entry(scope_candidate_id.into())
            .or_default()
            .insert(barrier_id.into());
    }

    /// All instances of a barrier, ordered by child execution id
    pub async fn instances_for(&self, barrier_id: &str) -> Vec<BarrierInstance> {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| i.barrier_id == barrier_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl BarrierExpandObserver for BarrierRegistry {
    fn name(&self) -> &str {
        "barrier-registry"
    }

    async fn on_fan_out(&self, request: &BarrierExpansionRequest) -> FanOutResult<()> {
        let barriers = match self
            .declarations
            .read()
            .await
            .get(&request.parent_candidate_id)
        {
            Some(barriers) => barriers.clone(),
            None => return Ok(()),
        };

        let mut instances = self.instances.write().await;
        let mut created = 0;
        for barrier_id in &barriers {
            for (candidate_id, execution_id) in request
                .child_candidate_ids
                .iter()
                .zip(&request.child_execution_ids)
            {
                let key = (barrier_id.clone(), execution_id.clone());
                if instances.contains_key(&key) {
                    continue;
                }
                instances.insert(
                    key,
                    BarrierInstance {
                        barrier_id: barrier_id.clone(),
                        plan_run_id: request.plan_run_id.clone(),
                        scope_id: request.scope_id.clone(),
                        parent_execution_id: request.parent_execution_id.clone(),
                        child_candidate_id: candidate_id.clone(),
                        child_execution_id: execution_id.clone(),
                        window: request.window,
                    },
                );
                created += 1;
            }
        }

        debug!(
            parent = %request.parent_execution_id,
            barriers = barriers.len(),
            created,
            "expanded barriers within loop"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FanOutError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(ids: &[&str]) -> BarrierExpansionRequest {
        BarrierExpansionRequest {
            plan_run_id: "plan-1".to_string(),
            parent_execution_id: "se-1".to_string(),
            parent_candidate_id: "deploy_strategy".to_string(),
            child_candidate_ids: ids.iter().map(|_| "deploy".to_string()).collect(),
            child_execution_ids: ids.iter().map(|s| s.to_string()).collect(),
            scope_id: "stage-1".to_string(),
            window: 2,
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl BarrierExpandObserver for Failing {
        async fn on_fan_out(&self, _request: &BarrierExpansionRequest) -> FanOutResult<()> {
            Err(FanOutError::BarrierExpansion("boom".to_string()))
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait::async_trait]
    impl BarrierExpandObserver for Counting {
        async fn on_fan_out(&self, _request: &BarrierExpansionRequest) -> FanOutResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_one_instance_per_child_and_barrier() {
        let registry = BarrierRegistry::new();
        registry.declare("deploy_strategy", "sync-a").await;
        registry.declare("deploy_strategy", "sync-b").await;

        registry.on_fan_out(&request(&["c1", "c2", "c3"])).await.unwrap();

        assert_eq!(registry.len().await, 6);
        let a = registry.instances_for("sync-a").await;
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(|i| i.window == 2 && i.scope_id == "stage-1"));
    }

    #[tokio::test]
    async fn test_redelivery_does_not_duplicate() {
        let registry = BarrierRegistry::new();
        registry.declare("deploy_strategy", "sync-a").await;

        registry.on_fan_out(&request(&["c1", "c2"])).await.unwrap();
        registry.on_fan_out(&request(&["c1", "c2"])).await.unwrap();

        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_undeclared_scope_is_ignored() {
        let registry = BarrierRegistry::new();
        registry.declare("other_strategy", "sync-a").await;

        registry.on_fan_out(&request(&["c1"])).await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_stop_others() {
        let counting = Arc::new(Counting::default());
        let mut subject = BarrierSubject::new();
        subject.register(Arc::new(Failing));
        subject.register(counting.clone());

        let informed = subject.fire_inform(&request(&["c1"])).await;

        assert_eq!(informed, 1);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
