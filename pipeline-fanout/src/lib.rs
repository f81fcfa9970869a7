// Pipeline Fan-out Library
// Fan-out/join coordination for dynamically spawned child executions

pub mod config;
pub mod error;
pub mod execution;
pub mod notify;
pub mod stores;

// Re-export commonly used types
pub use config::{CoordinatorConfig, FeatureToggle};
pub use error::{FanOutError, FanOutResult};

// Re-export execution types
pub use execution::{
    BarrierExpandObserver, BarrierRegistry, ChildOutcome, ChildSpec, ChildStatus,
    ConcurrencyCursor, ExecutionContext, FanOutCoordinator, FanOutEvent, Level, LoopExpander,
    LoopMetadata, NodeKind, ProgressSender, RollbackContext, RollbackTarget, RunMode,
    SelectedChild, SpawnOutcome, SpawnRequest, TierCeiling,
};

// Re-export notification types
pub use notify::{FanOutCallback, NotificationEngine, WaitNotifyEngine};

// Re-export store types
pub use stores::{
    ChildExecutionStore, CursorStore, FileCursorStore, InMemoryChildStore, InMemoryCursorStore,
    InMemoryParentStore, ParentExecutionStore,
};
