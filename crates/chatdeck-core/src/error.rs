//! Core error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] chatdeck_storage::StorageError),

    #[error("Tab error: {0}")]
    Tab(#[from] chatdeck_tabs::TabError),

    #[error("Session error: {0}")]
    Session(#[from] chatdeck_session::SessionError),

    #[error("Isolation error: {0}")]
    Isolation(#[from] chatdeck_isolation::IsolationError),

    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Deck not initialized")]
    NotInitialized,

    #[error("Deck is shut down")]
    ShutDown,
}
