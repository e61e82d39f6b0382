//! Tab error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown tab status: {0}")]
    UnknownStatus(String),

    #[error("Tab title cannot be empty")]
    EmptyTitle,

    #[error("Invalid value for metadata key {key}: {reason}")]
    InvalidMetadata { key: String, reason: String },
}
