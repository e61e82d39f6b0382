//! Chatdeck Storage Layer
//!
//! Tabs and checkpoints are stored as one JSON record each under a root
//! directory. Every write goes to a temporary file first and is renamed into
//! place, so a failed write never leaves a half-written primary record.
//! A separate index record summarizes tabs and checkpoints for cheap listing;
//! it is a cache and can always be rebuilt from the records.

mod atomic;
mod error;
mod index;
mod layout;
mod store;

pub use error::StorageError;
pub use index::{CheckpointSummary, TabIndex, TabSummary, SCHEMA_VERSION};
pub use layout::Layout;
pub use store::{CleanupReport, RebuildReport, StorageStats, Store};

pub type Result<T> = std::result::Result<T, StorageError>;
