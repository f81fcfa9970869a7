// Stores Module
// Collaborator interfaces for child/parent execution records and the cursor

pub mod file;
pub mod memory;

// Re-export key types
pub use file::FileCursorStore;
pub use memory::{InMemoryChildStore, InMemoryCursorStore, InMemoryParentStore};

use crate::error::FanOutResult;
use crate::execution::cursor::{ConcurrencyCursor, CursorAdvance};
use crate::execution::models::{ChildContext, ChildOutcome, ParentRecordedResponse, SelectedChild};

use std::collections::BTreeMap;

/// Node-execution store for children
#[async_trait::async_trait]
pub trait ChildExecutionStore: Send + Sync {
    /// Create the child record. No side effects outside the store.
    async fn create(
        &self,
        parent_execution_id: &str,
        child: &SelectedChild,
    ) -> FanOutResult<ChildContext>;

    /// Activate a created child
    async fn start(&self, child: &ChildContext) -> FanOutResult<()>;
}

/// Node-execution store for the parent
#[async_trait::async_trait]
pub trait ParentExecutionStore: Send + Sync {
    /// Resume the parent. Resuming an already resumed parent is a no-op.
    async fn resume(
        &self,
        parent_execution_id: &str,
        outcomes: BTreeMap<String, ChildOutcome>,
        failed: bool,
    ) -> FanOutResult<()>;

    /// Merge-upsert the recorded child set
    async fn append_child_set(
        &self,
        parent_execution_id: &str,
        response: ParentRecordedResponse,
    ) -> FanOutResult<()>;
}

/// Persistence for concurrency cursors.
///
/// `advance`, `halt` and `narrow` must each be a single atomic update;
/// continuation callbacks for sibling children may run concurrently.
#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    /// Upsert the cursor for a parent
    async fn save(&self, parent_execution_id: &str, cursor: &ConcurrencyCursor)
        -> FanOutResult<()>;

    async fn load(&self, parent_execution_id: &str) -> FanOutResult<Option<ConcurrencyCursor>>;

    async fn advance(
        &self,
        parent_execution_id: &str,
        finished_child: &str,
        failed: bool,
        proceed_if_failed: bool,
    ) -> FanOutResult<CursorAdvance>;

    /// Stop promotion; returns the queued ids that will never start
    async fn halt(&self, parent_execution_id: &str) -> FanOutResult<Vec<String>>;

    /// Drop every child not listed in `keep`
    async fn narrow(&self, parent_execution_id: &str, keep: &[String]) -> FanOutResult<()>;

    /// Confirm that the effect of `finished_child`'s completion was carried out
    async fn settle(&self, parent_execution_id: &str, finished_child: &str) -> FanOutResult<()>;
}
