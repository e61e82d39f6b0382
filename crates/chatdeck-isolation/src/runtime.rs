//! Arena of isolated sessions keyed by tab id

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::IsolationConfig;
use crate::error::IsolationError;
use crate::session::IsolatedSession;
use crate::task::{StateDelta, TabTask, TaskContext, TaskHandler, TaskKind, TaskTicket};
use crate::Result;

pub struct IsolationRuntime {
    config: IsolationConfig,
    handler: Arc<dyn TaskHandler>,
    sessions: Mutex<HashMap<String, Arc<IsolatedSession>>>,
    shut_down: AtomicBool,
}

impl IsolationRuntime {
    pub fn new(config: IsolationConfig, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            config,
            handler,
            sessions: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    /// Get the tab's lane, allocating it on first use.
    ///
    /// When the arena is full the least recently active lane is evicted and
    /// torn down on a separate task.
    pub async fn session(&self, tab_id: &str) -> Result<Arc<IsolatedSession>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(IsolationError::ShutDown(tab_id.to_string()));
        }

        let (session, evicted) = {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get(tab_id) {
                session.touch();
                return Ok(Arc::clone(session));
            }

            let mut evicted = Vec::new();
            while let Err(IsolationError::Capacity { limit }) =
                check_capacity(&sessions, self.config.max_sessions)
            {
                let Some(victim) = least_recently_active(&sessions) else {
                    break;
                };
                if let Some(session) = sessions.remove(&victim) {
                    tracing::info!(
                        tab_id = %victim,
                        limit,
                        "Evicting least recently active isolated session"
                    );
                    evicted.push(session);
                }
            }

            let session = IsolatedSession::spawn(
                tab_id.to_string(),
                &self.config,
                Arc::clone(&self.handler),
            );
            sessions.insert(tab_id.to_string(), Arc::clone(&session));
            (session, evicted)
        };

        // Evicted lanes drain in the background; the caller gets its lane now
        let drain_timeout = self.config.drain_timeout();
        for victim in evicted {
            tokio::spawn(async move { victim.teardown(drain_timeout).await });
        }

        Ok(session)
    }

    /// Run `operation` inline under the tab's lock
    pub async fn execute_in_isolated_session<F, Fut>(
        &self,
        tab_id: &str,
        operation: F,
    ) -> Result<StateDelta>
    where
        F: FnOnce(TaskContext) -> Fut + Send,
        Fut: Future<Output = Result<StateDelta>> + Send,
    {
        self.session(tab_id).await?.execute(operation).await
    }

    /// Run `operation` on the tab's worker pool under the tab's lock
    pub async fn execute_blocking_in_isolated_session<F>(
        &self,
        tab_id: &str,
        operation: F,
    ) -> Result<StateDelta>
    where
        F: FnOnce(Map<String, Value>) -> Result<StateDelta> + Send + 'static,
    {
        self.session(tab_id).await?.execute_blocking(operation).await
    }

    /// Queue a typed task on the tab's lane
    pub async fn submit(&self, tab_id: &str, kind: TaskKind, payload: Value) -> Result<TaskTicket> {
        let session = self.session(tab_id).await?;
        let ticket = session.submit(TabTask::new(tab_id, kind, payload))?;

        tracing::debug!(
            tab_id = %tab_id,
            task_id = %ticket.task_id(),
            kind = %kind,
            pending = session.pending(),
            "Queued task"
        );

        Ok(ticket)
    }

    /// Tear down the tab's lane if it has one. The tab itself is untouched.
    pub async fn release(&self, tab_id: &str) -> bool {
        let session = self.sessions.lock().remove(tab_id);
        match session {
            Some(session) => {
                session.teardown(self.config.drain_timeout()).await;
                true
            }
            None => false,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn contains(&self, tab_id: &str) -> bool {
        self.sessions.lock().contains_key(tab_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn active_tab_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Refuse new work and tear down every lane concurrently
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);

        let sessions: Vec<Arc<IsolatedSession>> =
            self.sessions.lock().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        let drain_timeout = self.config.drain_timeout();

        join_all(sessions.iter().map(|s| s.teardown(drain_timeout))).await;

        tracing::info!(sessions = count, "Isolation runtime shut down");
    }
}

fn check_capacity(
    sessions: &HashMap<String, Arc<IsolatedSession>>,
    max_sessions: usize,
) -> Result<()> {
    let limit = max_sessions.max(1);
    if sessions.len() >= limit {
        Err(IsolationError::Capacity { limit })
    } else {
        Ok(())
    }
}

fn least_recently_active(sessions: &HashMap<String, Arc<IsolatedSession>>) -> Option<String> {
    sessions
        .values()
        .min_by_key(|s| s.last_active())
        .map(|s| s.tab_id().to_string())
}
