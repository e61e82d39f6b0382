//! Chatdeck Tab Model
//!
//! A tab is an independent chat session: an append-only message log, an opaque
//! context state contributed by retrieval, and a status driven by a small state
//! machine. Checkpoints are immutable deep copies of a tab's mutable fields.

mod checkpoint;
mod error;
mod message;
mod metadata;
mod state;
mod tab;

pub use checkpoint::{ChatCheckpoint, CheckpointType};
pub use error::TabError;
pub use message::{ChatMessage, ContextReference, MessageType};
pub use metadata::Metadata;
pub use state::TabStatus;
pub use tab::{ChatTab, TabSnapshot, DEFAULT_MODEL};

pub type Result<T> = std::result::Result<T, TabError>;
