//! Chatdeck Isolated Sessions
//!
//! Every tab that runs work gets its own execution lane: a lock scoped to the
//! tab, a bounded task queue, a small worker pool for blocking work and a
//! consumer loop that dispatches queued tasks by kind. A slow or failing tab
//! only ever stalls its own lane. The number of live lanes is capped; the
//! least recently active lane is torn down to make room.

mod config;
mod error;
mod pool;
mod runtime;
mod session;
mod task;

pub use config::IsolationConfig;
pub use error::IsolationError;
pub use pool::WorkerPool;
pub use runtime::IsolationRuntime;
pub use session::{IsolatedSession, SessionState};
pub use task::{StateDelta, TabTask, TaskContext, TaskHandler, TaskKind, TaskTicket};

pub type Result<T> = std::result::Result<T, IsolationError>;
