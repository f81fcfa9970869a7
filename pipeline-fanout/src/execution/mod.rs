// Execution Module
// Fan-out coordination: selection, concurrency windows, callbacks and join

pub mod barrier;
pub mod callbacks;
pub mod context;
pub mod coordinator;
pub mod cursor;
pub mod events;
pub mod limiter;
pub mod models;
pub mod selector;
pub mod strategy;

// Re-export key types
pub use barrier::{
    BarrierExpandObserver, BarrierExpansionRequest, BarrierInstance, BarrierRegistry,
    BarrierSubject,
};
pub use context::{ExecutionContext, Level, NodeKind, RunMode, ScopeKind};
pub use coordinator::{FanOutCoordinator, SpawnOutcome, SpawnRequest};
pub use cursor::{ConcurrencyCursor, CursorAdvance, PendingEffect, RecoveryPlan};
pub use events::{progress_channel, EventSender, FanOutEvent, ProgressReceiver, ProgressSender};
pub use limiter::{ConcurrencyLimiter, Edition, FixedCeiling, TierCeiling, TierCeilings};
pub use models::{
    ChildContext, ChildOutcome, ChildSpec, ChildStatus, LoopMetadata, ParentRecordedResponse,
    SelectedChild,
};
pub use selector::{
    ChildSelector, FallbackRollbackContext, RollbackContext, RollbackEntry, RollbackTarget,
};
pub use strategy::{LoopExpander, LoopStrategy, MatrixBuilder};
