// Notification Module
// Durable callback payloads and the wait/notify engine interface

pub mod memory;

pub use memory::WaitNotifyEngine;

use crate::error::FanOutResult;
use crate::execution::models::ChildOutcome;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fired when a windowed child finishes; promotes the next queued child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationCallback {
    pub parent_execution_id: String,
    pub plan_run_id: String,
    pub window: usize,
    pub proceed_if_failed: bool,
}

/// Fired when every selected child finished; resumes the parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCallback {
    pub parent_execution_id: String,
    pub plan_run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanOutCallback {
    Continuation(ContinuationCallback),
    Join(JoinCallback),
}

impl FanOutCallback {
    pub fn parent_execution_id(&self) -> &str {
        match self {
            Self::Continuation(cb) => &cb.parent_execution_id,
            Self::Join(cb) => &cb.parent_execution_id,
        }
    }
}

/// A wait instance whose ids have all been notified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredCallback {
    pub subscription_id: String,
    pub publisher: String,
    pub callback: FanOutCallback,
    pub outcomes: BTreeMap<String, ChildOutcome>,
}

/// Result of registering a wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitRegistration {
    pub subscription_id: String,
    /// Present when every id had already been notified at registration time
    pub fired: Option<FiredCallback>,
}

/// Engine delivering callbacks once all awaited ids have finished
#[async_trait::async_trait]
pub trait NotificationEngine: Send + Sync {
    /// Register `callback` to fire once every id in `ids` has an outcome
    async fn wait_for_all(
        &self,
        publisher: &str,
        callback: FanOutCallback,
        ids: &[String],
    ) -> FanOutResult<WaitRegistration>;

    /// Record an id's outcome. Only the first outcome per id counts. Returns
    /// the wait instances that became complete; each fires at most once.
    async fn notify(&self, id: &str, outcome: ChildOutcome) -> FanOutResult<Vec<FiredCallback>>;

    /// Drop recorded outcomes for ids nothing waits on any more. Engines that
    /// expire outcomes on their own can keep the default.
    async fn forget(&self, _ids: &[String]) -> FanOutResult<()> {
        Ok(())
    }
}
