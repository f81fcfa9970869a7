// In-memory Stores
// Process-local implementations of the store traits

use crate::error::{FanOutError, FanOutResult};
use crate::execution::cursor::{ConcurrencyCursor, CursorAdvance};
use crate::execution::models::{ChildContext, ChildOutcome, ParentRecordedResponse, SelectedChild};
use crate::stores::{ChildExecutionStore, CursorStore, ParentExecutionStore};

use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Cursor store backed by a mutex-guarded map
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<String, ConcurrencyCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn save(
        &self,
        parent_execution_id: &str,
        cursor: &ConcurrencyCursor,
    ) -> FanOutResult<()> {
        self.cursors
            .lock()
            .await
            .insert(parent_execution_id.to_string(), cursor.clone());
        Ok(())
    }

    async fn load(&self, parent_execution_id: &str) -> FanOutResult<Option<ConcurrencyCursor>> {
        Ok(self.cursors.lock().await.get(parent_execution_id).cloned())
    }

    async fn advance(
        &self,
        parent_execution_id: &str,
        finished_child: &str,
        failed: bool,
        proceed_if_failed: bool,
    ) -> FanOutResult<CursorAdvance> {
        let mut cursors = self.cursors.lock().await;
        Ok(match cursors.get_mut(parent_execution_id) {
            Some(cursor) => cursor.advance(finished_child, failed, proceed_if_failed),
            None => CursorAdvance::Inactive,
        })
    }

    async fn halt(&self, parent_execution_id: &str) -> FanOutResult<Vec<String>> {
        let mut cursors = self.cursors.lock().await;
        Ok(cursors
            .get_mut(parent_execution_id)
            .map(|c| c.halt())
            .unwrap_or_default())
    }

    async fn narrow(&self, parent_execution_id: &str, keep: &[String]) -> FanOutResult<()> {
        let mut cursors = self.cursors.lock().await;
        if let Some(cursor) = cursors.get_mut(parent_execution_id) {
            cursor.narrow(keep);
        }
        Ok(())
    }

    async fn settle(&self, parent_execution_id: &str, finished_child: &str) -> FanOutResult<()> {
        let mut cursors = self.cursors.lock().await;
        if let Some(cursor) = cursors.get_mut(parent_execution_id) {
            cursor.settle(finished_child);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ChildRecord {
    context: ChildContext,
    started: bool,
}

#[derive(Default)]
struct ChildTable {
    records: HashMap<String, ChildRecord>,
    created: Vec<String>,
    started: Vec<String>,
}

/// Child execution store that records creations and starts in order
#[derive(Default)]
pub struct InMemoryChildStore {
    table: RwLock<ChildTable>,
}

impl InMemoryChildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execution ids in creation order
    pub async fn created_ids(&self) -> Vec<String> {
        self.table.read().await.created.clone()
    }

    /// Execution ids in start order
    pub async fn started_ids(&self) -> Vec<String> {
        self.table.read().await.started.clone()
    }

    pub async fn get(&self, execution_id: &str) -> Option<ChildContext> {
        self.table
            .read()
            .await
            .records
            .get(execution_id)
            .map(|r| r.context.clone())
    }
}

#[async_trait::async_trait]
impl ChildExecutionStore for InMemoryChildStore {
    async fn create(
        &self,
        parent_execution_id: &str,
        child: &SelectedChild,
    ) -> FanOutResult<ChildContext> {
        let mut table = self.table.write().await;
        if let Some(existing) = table.records.get(&child.execution_id) {
            return Ok(existing.context.clone());
        }

        let context = ChildContext {
            parent_execution_id: parent_execution_id.to_string(),
            execution_id: child.execution_id.clone(),
            candidate_node_id: child.candidate_node_id.clone(),
            loop_metadata: child.loop_metadata.clone(),
        };
        table.records.insert(
            child.execution_id.clone(),
            ChildRecord {
                context: context.clone(),
                started: false,
            },
        );
        table.created.push(child.execution_id.clone());
        Ok(context)
    }

    async fn start(&self, child: &ChildContext) -> FanOutResult<()> {
        let mut table = self.table.write().await;
        let record = table
            .records
            .get_mut(&child.execution_id)
            .ok_or_else(|| FanOutError::start(&child.execution_id, "child was never created"))?;
        if record.started {
            return Ok(());
        }
        record.started = true;
        table.started.push(child.execution_id.clone());
        Ok(())
    }
}

/// How a parent was resumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRecord {
    pub outcomes: BTreeMap<String, ChildOutcome>,
    pub failed: bool,
}

#[derive(Default)]
struct ParentTable {
    resumed: HashMap<String, ResumeRecord>,
    attempts: HashMap<String, usize>,
    responses: HashMap<String, ParentRecordedResponse>,
}

/// Parent store with a resume-once state machine
#[derive(Default)]
pub struct InMemoryParentStore {
    table: RwLock<ParentTable>,
}

impl InMemoryParentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resumed(&self, parent_execution_id: &str) -> Option<ResumeRecord> {
        self.table
            .read()
            .await
            .resumed
            .get(parent_execution_id)
            .cloned()
    }

    /// Number of resume calls received, including ignored duplicates
    pub async fn resume_attempts(&self, parent_execution_id: &str) -> usize {
        self.table
            .read()
            .await
            .attempts
            .get(parent_execution_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn recorded_response(
        &self,
        parent_execution_id: &str,
    ) -> Option<ParentRecordedResponse> {
        self.table
            .read()
            .await
            .responses
            .get(parent_execution_id)
            .cloned()
    }
}

#[async_trait::async_trait]
impl ParentExecutionStore for InMemoryParentStore {
    async fn resume(
        &self,
        parent_execution_id: &str,
        outcomes: BTreeMap<String, ChildOutcome>,
        failed: bool,
    ) -> FanOutResult<()> {
        let mut table = self.table.write().await;
        *table
            .attempts
            .entry(parent_execution_id.to_string())
            .or_default() += 1;

        if table.resumed.contains_key(parent_execution_id) {
            debug!(parent = parent_execution_id, "parent already resumed");
            return Ok(());
        }
        table.resumed.insert(
            parent_execution_id.to_string(),
            ResumeRecord { outcomes, failed },
        );
        Ok(())
    }

    async fn append_child_set(
        &self,
        parent_execution_id: &str,
        response: ParentRecordedResponse,
    ) -> FanOutResult<()> {
        self.table
            .write()
            .await
            .responses
            .entry(parent_execution_id.to_string())
            .or_default()
            .merge(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::models::ChildSpec;

    fn child(id: &str) -> SelectedChild {
        SelectedChild::new(id, ChildSpec::new("deploy"))
    }

    #[tokio::test]
    async fn test_child_create_is_idempotent() {
        let store = InMemoryChildStore::new();
        let first = store.create("p1", &child("c1")).await.unwrap();
        let second = store.create("p1", &child("c1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.created_ids().await, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_start_requires_create_and_is_idempotent() {
        let store = InMemoryChildStore::new();
        let ctx = ChildContext {
            parent_execution_id: "p1".to_string(),
            execution_id: "ghost".to_string(),
            candidate_node_id: "deploy".to_string(),
            loop_metadata: None,
        };
        assert!(store.start(&ctx).await.is_err());

        let ctx = store.create("p1", &child("c1")).await.unwrap();
        store.start(&ctx).await.unwrap();
        store.start(&ctx).await.unwrap();
        assert_eq!(store.started_ids().await, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_parent_resumes_once() {
        let store = InMemoryParentStore::new();
        store.resume("p1", BTreeMap::new(), false).await.unwrap();
        store.resume("p1", BTreeMap::new(), true).await.unwrap();

        assert_eq!(store.resume_attempts("p1").await, 2);
        assert!(!store.resumed("p1").await.unwrap().failed);
    }

    #[tokio::test]
    async fn test_cursor_store_advance_without_cursor() {
        let store = InMemoryCursorStore::new();
        assert_eq!(
            store.advance("p1", "c1", false, true).await.unwrap(),
            CursorAdvance::Inactive
        );
        assert!(store.halt("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_store_concurrent_advances_promote_each_child_once() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryCursorStore::new());
        let children: Vec<_> = (0..10).map(|i| child(&format!("c{}", i))).collect();
        store
            .save("p1", &ConcurrencyCursor::new(children, 5))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .advance("p1", &format!("c{}", i), false, true)
                    .await
                    .unwrap()
            }));
        }

        let mut promoted = Vec::new();
        for handle in handles {
            if let CursorAdvance::Promote { next, .. } = handle.await.unwrap() {
                promoted.push(next.execution_id);
            }
        }
        promoted.sort();
        assert_eq!(promoted, vec!["c5", "c6", "c7", "c8", "c9"]);
        assert_eq!(store.load("p1").await.unwrap().unwrap().window, 10);
    }
}
