//! Chatdeck Session Management
//!
//! - Tabs are resident in memory while in use and persisted on every mutation
//! - Exactly one tab is active at a time
//! - Checkpoints capture a tab's full state; restoring one is itself checkpointed
//! - Slow work (replies, context refreshes, file reads) runs in the tab's
//!   isolated lane, never on the orchestration path
//! - A background sweep retires stale data and evicts idle tabs

mod collaborators;
mod config;
mod error;
mod events;
mod handler;
mod maintenance;
mod manager;
mod tab_manager;

#[cfg(test)]
mod testing;

pub use collaborators::{ContextRetriever, NoContext, ResponseGenerator};
pub use config::{MaintenanceConfig, SessionConfig};
pub use error::SessionError;
pub use events::SessionEvent;
pub use handler::SessionTaskHandler;
pub use maintenance::{MaintenanceReport, MaintenanceScheduler};
pub use manager::{SessionManager, SessionStats};
pub use tab_manager::TabManager;

pub type Result<T> = std::result::Result<T, SessionError>;
