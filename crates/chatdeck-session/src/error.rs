//! Session error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Tab not found: {0}")]
    NotFound(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("No active tab")]
    NoActiveTab,

    /// The manager was shut down; it cannot be initialized again
    #[error("Session manager is shut down")]
    ShutDown,

    #[error("Storage error: {0}")]
    Storage(#[from] chatdeck_storage::StorageError),

    #[error("Tab error: {0}")]
    Tab(#[from] chatdeck_tabs::TabError),

    #[error("Isolation error: {0}")]
    Isolation(#[from] chatdeck_isolation::IsolationError),

    #[error("Background worker failed: {0}")]
    Worker(String),
}
