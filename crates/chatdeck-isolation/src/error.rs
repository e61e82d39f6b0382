//! Isolation error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsolationError {
    /// Raised while allocating a lane; resolved by evicting the least recently
    /// active one and never returned to callers
    #[error("Isolated session limit reached ({limit})")]
    Capacity { limit: usize },

    #[error("Task queue for tab {0} is full")]
    QueueFull(String),

    #[error("Task {0} was dropped before it completed")]
    TaskDropped(String),

    #[error("Isolated session for tab {0} is shut down")]
    ShutDown(String),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl IsolationError {
    pub fn operation(err: impl std::fmt::Display) -> Self {
        Self::Operation(err.to_string())
    }
}
