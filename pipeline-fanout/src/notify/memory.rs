// In-memory Wait/Notify Engine
// Correlates child outcomes with registered wait instances

use crate::error::FanOutResult;
use crate::execution::models::ChildOutcome;
use crate::notify::{FanOutCallback, FiredCallback, NotificationEngine, WaitRegistration};

use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct WaitInstance {
    publisher: String,
    callback: FanOutCallback,
    ids: Vec<String>,
}

#[derive(Default)]
struct EngineState {
    waits: HashMap<String, WaitInstance>,
    /// id -> subscriptions waiting on it
    waiting_on: HashMap<String, Vec<String>>,
    responses: HashMap<String, ChildOutcome>,
}

impl EngineState {
    fn is_complete(&self, wait: &WaitInstance) -> bool {
        wait.ids.iter().all(|id| self.responses.contains_key(id))
    }

    fn fire(&mut self, subscription_id: &str) -> Option<FiredCallback> {
        let wait = self.waits.remove(subscription_id)?;
        for id in &wait.ids {
            if let Some(subs) = self.waiting_on.get_mut(id) {
                subs.retain(|s| s != subscription_id);
                if subs.is_empty() {
                    self.waiting_on.remove(id);
                }
            }
        }

        let outcomes: BTreeMap<String, ChildOutcome> = wait
            .ids
            .iter()
            .filter_map(|id| self.responses.get(id).map(|o| (id.clone(), o.clone())))
            .collect();

        Some(FiredCallback {
            subscription_id: subscription_id.to_string(),
            publisher: wait.publisher,
            callback: wait.callback,
            outcomes,
        })
    }
}

/// Process-local notification engine
#[derive(Default)]
pub struct WaitNotifyEngine {
    state: Mutex<EngineState>,
}

impl WaitNotifyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of wait instances that have not fired yet
    pub async fn pending_waits(&self) -> usize {
        self.state.lock().await.waits.len()
    }

    /// Number of outcomes still held in memory
    pub async fn recorded_outcomes(&self) -> usize {
        self.state.lock().await.responses.len()
    }

    /// Pending callbacks waiting on a given id
    pub async fn waiting_on(&self, id: &str) -> Vec<FanOutCallback> {
        let state = self.state.lock().await;
        state
            .waiting_on
            .get(id)
            .map(|subs| {
                subs.iter()
                    .filter_map(|s| state.waits.get(s).map(|w| w.callback.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl NotificationEngine for WaitNotifyEngine {
    async fn wait_for_all(
        &self,
        publisher: &str,
        callback: FanOutCallback,
        ids: &[String],
    ) -> FanOutResult<WaitRegistration> {
        let subscription_id = Uuid::new_v4().to_string();
        let wait = WaitInstance {
            publisher: publisher.to_string(),
            callback,
            ids: ids.to_vec(),
        };

        let mut state = self.state.lock().await;
        let complete = state.is_complete(&wait);
        for id in ids {
            state
                .waiting_on
                .entry(id.clone())
                .or_default()
                .push(subscription_id.clone());
        }
        state.waits.insert(subscription_id.clone(), wait);

        let fired = if complete {
            state.fire(&subscription_id)
        } else {
            None
        };
        debug!(
            subscription = %subscription_id,
            ids = ids.len(),
            fired = fired.is_some(),
            "registered wait instance"
        );

        Ok(WaitRegistration {
            subscription_id,
            fired,
        })
    }

    async fn notify(&self, id: &str, outcome: ChildOutcome) -> FanOutResult<Vec<FiredCallback>> {
        let mut state = self.state.lock().await;
        if state.responses.contains_key(id) {
            debug!(id, "duplicate notification ignored");
            return Ok(Vec::new());
        }
        state.responses.insert(id.to_string(), outcome);

        let candidates = state.waiting_on.get(id).cloned().unwrap_or_default();
        let mut fired = Vec::new();
        for subscription_id in candidates {
            let complete = state
                .waits
                .get(&subscription_id)
                .map(|w| state.is_complete(w))
                .unwrap_or(false);
            if complete {
                if let Some(callback) = state.fire(&subscription_id) {
                    fired.push(callback);
                }
            }
        }
        Ok(fired)
    }

    async fn forget(&self, ids: &[String]) -> FanOutResult<()> {
        let mut state = self.state.lock().await;
        let mut dropped = 0;
        for id in ids {
            if state.waiting_on.contains_key(id) {
                continue;
            }
            if state.responses.remove(id).is_some() {
                dropped += 1;
            }
        }
        debug!(dropped, kept = state.responses.len(), "forgot recorded outcomes");
        Ok(())
    }
}
