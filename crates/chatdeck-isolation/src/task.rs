//! Tasks queued against a tab

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::IsolationError;
use crate::pool::WorkerPool;
use crate::Result;

/// Keys merged back into a lane's in-memory state after an operation
pub type StateDelta = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AiResponse,
    ContextUpdate,
    FileOperation,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::AiResponse => "ai_response",
            TaskKind::ContextUpdate => "context_update",
            TaskKind::FileOperation => "file_operation",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabTask {
    pub id: String,
    pub tab_id: String,
    pub kind: TaskKind,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl TabTask {
    pub fn new(tab_id: impl Into<String>, kind: TaskKind, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tab_id: tab_id.into(),
            kind,
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// What an operation sees while it holds the tab's lock
pub struct TaskContext {
    tab_id: String,
    state: Map<String, Value>,
    pool: WorkerPool,
}

impl TaskContext {
    pub(crate) fn new(tab_id: String, state: Map<String, Value>, pool: WorkerPool) -> Self {
        Self {
            tab_id,
            state,
            pool,
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// The lane's state as of lock acquisition
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// Run blocking work (file I/O, heavy text processing) on the lane's pool
    pub async fn run_blocking<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.pool.run(job).await
    }
}

/// Dispatches queued tasks by kind. Implemented by the session layer.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: TabTask, ctx: TaskContext) -> Result<StateDelta>;
}

pub(crate) struct QueuedTask {
    pub(crate) task: TabTask,
    pub(crate) reply: oneshot::Sender<Result<StateDelta>>,
}

/// Handle for awaiting a queued task's outcome
#[derive(Debug)]
pub struct TaskTicket {
    task_id: String,
    kind: TaskKind,
    rx: oneshot::Receiver<Result<StateDelta>>,
}

impl TaskTicket {
    pub(crate) fn new(
        task_id: String,
        kind: TaskKind,
        rx: oneshot::Receiver<Result<StateDelta>>,
    ) -> Self {
        Self { task_id, kind, rx }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Wait for completion. A task dropped by eviction or shutdown yields
    /// [`IsolationError::TaskDropped`].
    pub async fn wait(self) -> Result<StateDelta> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(IsolationError::TaskDropped(self.task_id)),
        }
    }
}
