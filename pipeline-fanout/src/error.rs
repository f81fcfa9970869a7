// Fan-out Errors
// Error taxonomy shared by the coordinator, its stores and the notification engine

use std::io;
use thiserror::Error;

/// Errors that can occur while fanning out or joining child executions
#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("Failed to persist concurrency cursor for {parent}: {message}")]
    CursorPersistence { parent: String, message: String },

    #[error("Failed to create child execution {execution_id}: {message}")]
    ChildCreation {
        execution_id: String,
        message: String,
    },

    #[error("Failed to start child execution {execution_id}: {message}")]
    ChildStart {
        execution_id: String,
        message: String,
    },

    #[error("Parent execution store error for {parent}: {message}")]
    ParentStore { parent: String, message: String },

    #[error("Notification engine error: {0}")]
    Notification(String),

    #[error("Rollback lookup failed for stage {stage_id}: {message}")]
    RollbackLookup { stage_id: String, message: String },

    #[error("Concurrency limiter failed: {0}")]
    Limiter(String),

    #[error("Barrier expansion failed: {0}")]
    BarrierExpansion(String),

    #[error("Invalid spawn request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result alias used throughout the crate
pub type FanOutResult<T> = Result<T, FanOutError>;

impl FanOutError {
    pub fn cursor(parent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CursorPersistence {
            parent: parent.into(),
            message: message.into(),
        }
    }

    pub fn creation(execution_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChildCreation {
            execution_id: execution_id.into(),
            message: message.into(),
        }
    }

    pub fn start(execution_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChildStart {
            execution_id: execution_id.into(),
            message: message.into(),
        }
    }

    pub fn parent(parent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParentStore {
            parent: parent.into(),
            message: message.into(),
        }
    }

    /// Whether the error must abort the whole spawn attempt.
    ///
    /// Only cursor persistence is fatal: it happens before any child exists,
    /// so the caller can retry the spawn from scratch. Everything else resolves
    /// into a failed child outcome or a normally resumed parent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CursorPersistence { .. })
    }
}
