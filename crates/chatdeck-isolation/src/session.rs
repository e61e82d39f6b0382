//! A single tab's execution lane

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::IsolationConfig;
use crate::error::IsolationError;
use crate::pool::WorkerPool;
use crate::task::{QueuedTask, StateDelta, TabTask, TaskContext, TaskHandler, TaskKind, TaskTicket};
use crate::Result;

/// In-memory state of a lane. Dropped with the lane; never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub values: Map<String, Value>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_task: Option<TaskKind>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn merge(&mut self, delta: &StateDelta) {
        for (key, value) in delta {
            self.values.insert(key.clone(), value.clone());
        }
    }

    fn record(&mut self, kind: Option<TaskKind>, succeeded: bool) {
        if succeeded {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        if kind.is_some() {
            self.last_task = kind;
        }
        self.last_completed_at = Some(Utc::now());
    }
}

pub struct IsolatedSession {
    tab_id: String,
    /// The tab's lock; held for the whole of every operation
    state: Arc<Mutex<SessionState>>,
    queue: mpsc::Sender<QueuedTask>,
    queue_capacity: usize,
    pool: WorkerPool,
    cancel: CancellationToken,
    consumer: SyncMutex<Option<JoinHandle<()>>>,
    last_active: SyncMutex<Instant>,
}

impl IsolatedSession {
    /// Allocate the lane and start its consumer loop
    pub(crate) fn spawn(
        tab_id: String,
        config: &IsolationConfig,
        handler: Arc<dyn TaskHandler>,
    ) -> Arc<Self> {
        let queue_capacity = config.queue_capacity.max(1);
        let (queue, rx) = mpsc::channel(queue_capacity);
        let state = Arc::new(Mutex::new(SessionState::default()));
        let pool = WorkerPool::new(config.workers_per_session);
        let cancel = CancellationToken::new();

        let consumer = tokio::spawn(consume(
            tab_id.clone(),
            Arc::clone(&state),
            pool.clone(),
            cancel.clone(),
            rx,
            handler,
        ));

        tracing::debug!(
            tab_id = %tab_id,
            queue_capacity,
            workers = pool.size(),
            "Allocated isolated session"
        );

        Arc::new(Self {
            tab_id,
            state,
            queue,
            queue_capacity,
            pool,
            cancel,
            consumer: SyncMutex::new(Some(consumer)),
            last_active: SyncMutex::new(Instant::now()),
        })
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    pub(crate) fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tasks waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue_capacity - self.queue.capacity()
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Queue a task without waiting for room; a full queue is reported, not awaited
    pub(crate) fn submit(&self, task: TabTask) -> Result<TaskTicket> {
        if self.is_closed() {
            return Err(IsolationError::ShutDown(self.tab_id.clone()));
        }

        let (reply, rx) = oneshot::channel();
        let ticket = TaskTicket::new(task.id.clone(), task.kind, rx);

        self.queue
            .try_send(QueuedTask { task, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    IsolationError::QueueFull(self.tab_id.clone())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    IsolationError::ShutDown(self.tab_id.clone())
                }
            })?;

        self.touch();
        Ok(ticket)
    }

    /// Run a cooperative operation while holding the tab's lock, then merge
    /// the delta it returns
    pub async fn execute<F, Fut>(&self, operation: F) -> Result<StateDelta>
    where
        F: FnOnce(TaskContext) -> Fut + Send,
        Fut: Future<Output = Result<StateDelta>> + Send,
    {
        if self.is_closed() {
            return Err(IsolationError::ShutDown(self.tab_id.clone()));
        }
        self.touch();

        let mut state = self.state.lock().await;
        let ctx = TaskContext::new(self.tab_id.clone(), state.values.clone(), self.pool.clone());
        let result = operation(ctx).await;
        apply(&mut state, None, &result);
        result
    }

    /// Run a blocking operation on the lane's worker pool while holding the
    /// tab's lock, then merge the delta it returns
    pub async fn execute_blocking<F>(&self, operation: F) -> Result<StateDelta>
    where
        F: FnOnce(Map<String, Value>) -> Result<StateDelta> + Send + 'static,
    {
        if self.is_closed() {
            return Err(IsolationError::ShutDown(self.tab_id.clone()));
        }
        self.touch();

        let mut state = self.state.lock().await;
        let snapshot = state.values.clone();
        let result = self
            .pool
            .run(move || operation(snapshot))
            .await
            .and_then(|inner| inner);
        apply(&mut state, None, &result);
        result
    }

    /// Stop the consumer loop and release the worker pool.
    ///
    /// Queued tasks that have not started are dropped. A task already running
    /// gets `drain_timeout` to finish before it is aborted.
    pub(crate) async fn teardown(&self, drain_timeout: Duration) {
        self.cancel.cancel();

        let consumer = self.consumer.lock().take();
        if let Some(mut handle) = consumer {
            if tokio::time::timeout(drain_timeout, &mut handle).await.is_err() {
                tracing::warn!(
                    tab_id = %self.tab_id,
                    timeout_ms = drain_timeout.as_millis() as u64,
                    "In-flight task did not finish in time, aborting"
                );
                handle.abort();
                let _ = handle.await;
            }
        }

        self.pool.shutdown();
        tracing::debug!(tab_id = %self.tab_id, "Tore down isolated session");
    }
}

fn apply(state: &mut SessionState, kind: Option<TaskKind>, result: &Result<StateDelta>) {
    match result {
        Ok(delta) => {
            state.merge(delta);
            state.record(kind, true);
        }
        Err(_) => state.record(kind, false),
    }
}

async fn consume(
    tab_id: String,
    state: Arc<Mutex<SessionState>>,
    pool: WorkerPool,
    cancel: CancellationToken,
    mut rx: mpsc::Receiver<QueuedTask>,
    handler: Arc<dyn TaskHandler>,
) {
    loop {
        let queued = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(queued) => queued,
                None => break,
            },
        };

        let QueuedTask { task, reply } = queued;
        let task_id = task.id.clone();
        let kind = task.kind;

        let result = {
            let mut guard = state.lock().await;
            let ctx = TaskContext::new(tab_id.clone(), guard.values.clone(), pool.clone());
            let result = handler.handle(task, ctx).await;
            apply(&mut guard, Some(kind), &result);
            result
        };

        if let Err(e) = &result {
            tracing::warn!(tab_id = %tab_id, task_id = %task_id, kind = %kind, error = %e, "Task failed");
        }

        // The waiter may have given up; that is fine
        let _ = reply.send(result);
    }

    rx.close();
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::warn!(tab_id = %tab_id, dropped, "Dropped queued tasks on teardown");
    }
}
