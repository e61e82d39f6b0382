//! Chatdeck Core
//!
//! Central coordination layer: one [`Deck`] owns the store and the session
//! manager for the lifetime of the process. Nothing is global; callers hold
//! the deck and drive its `initialize`/`shutdown` lifecycle.

mod config;
mod deck;
mod error;

pub use config::Config;
pub use deck::{Deck, DeckStatistics};
pub use error::CoreError;

// Re-export core components
pub use chatdeck_isolation::{IsolationConfig, IsolationError, StateDelta, TaskKind, TaskTicket};
pub use chatdeck_session::{
    ContextRetriever, MaintenanceConfig, MaintenanceReport, NoContext, ResponseGenerator,
    SessionConfig, SessionError, SessionEvent, SessionManager, SessionStats,
};
pub use chatdeck_storage::{CheckpointSummary, StorageError, StorageStats, Store, TabSummary};
pub use chatdeck_tabs::{
    ChatCheckpoint, ChatMessage, ChatTab, CheckpointType, ContextReference, MessageType, Metadata,
    TabError, TabStatus,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging. `RUST_LOG` wins over the default filter.
pub fn init_logging() {
    init_logging_with("info");
}

pub fn init_logging_with(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A subscriber may already be installed (tests, embedding hosts)
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
