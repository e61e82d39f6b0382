//! Session Manager
//!
//! Entry point for callers. Lifecycle operations run against the tab manager
//! on the blocking pool; slow work (replies, context refreshes, file reads) is
//! queued on the tab's isolated lane and awaited through a [`TaskTicket`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use chatdeck_isolation::{IsolationRuntime, TaskKind, TaskTicket};
use chatdeck_storage::{CheckpointSummary, Store, TabSummary};
use chatdeck_tabs::{ChatCheckpoint, ChatMessage, ChatTab, CheckpointType};

use crate::collaborators::{ContextRetriever, NoContext, ResponseGenerator};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::handler::SessionTaskHandler;
use crate::maintenance::{MaintenanceReport, MaintenanceScheduler};
use crate::tab_manager::TabManager;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub active_tab_id: Option<String>,
    pub resident_tabs: usize,
    pub resident_messages: usize,
    pub persisted_tabs: usize,
    pub archived_tabs: usize,
    pub checkpoints: usize,
    pub isolated_sessions: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
}

pub struct SessionManager {
    tabs: TabManager,
    runtime: Arc<IsolationRuntime>,
    retriever: Arc<dyn ContextRetriever>,
    scheduler: Arc<MaintenanceScheduler>,
}

impl SessionManager {
    pub fn new(store: Store, config: SessionConfig, generator: Arc<dyn ResponseGenerator>) -> Self {
        Self::with_retriever(store, config, generator, Arc::new(NoContext))
    }

    pub fn with_retriever(
        store: Store,
        config: SessionConfig,
        generator: Arc<dyn ResponseGenerator>,
        retriever: Arc<dyn ContextRetriever>,
    ) -> Self {
        let isolation = config.isolation.clone();
        let maintenance = config.maintenance.clone();

        let tabs = TabManager::new(store, config);
        let handler = SessionTaskHandler::new(tabs.clone(), Arc::clone(&retriever), generator);
        let runtime = Arc::new(IsolationRuntime::new(isolation, Arc::new(handler)));
        let scheduler = Arc::new(
            MaintenanceScheduler::new(tabs.clone(), maintenance).with_runtime(Arc::clone(&runtime)),
        );

        Self {
            tabs,
            runtime,
            retriever,
            scheduler,
        }
    }

    /// Hydrate recently used tabs, activate the newest and start the
    /// maintenance loop. Returns the active tab, if any tab was persisted.
    /// A manager that has been shut down refuses to initialize again.
    pub async fn initialize(&self) -> Result<Option<ChatTab>> {
        if self.runtime.is_shut_down() {
            return Err(SessionError::ShutDown);
        }

        let limit = self.tabs.config().hydrate_on_start;
        let active = self
            .blocking(move |tabs| tabs.hydrate_recent(limit))
            .await?;

        self.scheduler.start();

        tracing::info!(
            resident = self.tabs.resident_count(),
            active_tab = ?active.as_ref().map(|t| t.id.as_str()),
            "Initialized session manager"
        );

        Ok(active)
    }

    /// Stop maintenance, drain the isolated lanes and persist every resident tab
    pub async fn shutdown(&self) {
        let drain_timeout = self.runtime.config().drain_timeout();
        self.scheduler.shutdown(drain_timeout).await;
        self.runtime.shutdown().await;

        let failures = self
            .blocking(|tabs| Ok(tabs.persist_all()))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to persist tabs on shutdown");
                1
            });

        tracing::info!(failures, "Session manager shut down");
    }

    // === Lifecycle ===

    pub async fn create_new_tab(
        &self,
        title: Option<String>,
        workspace: Option<PathBuf>,
        model: Option<String>,
    ) -> Result<ChatTab> {
        self.blocking(move |tabs| tabs.create_tab(title, workspace, model))
            .await
    }

    pub async fn switch_to_tab(&self, tab_id: &str) -> Result<ChatTab> {
        let tab_id = tab_id.to_string();
        self.blocking(move |tabs| tabs.switch_to_tab(&tab_id)).await
    }

    /// Close a tab and tear down its isolated lane
    pub async fn close_tab(&self, tab_id: &str, force: bool) -> Result<()> {
        let id = tab_id.to_string();
        self.blocking(move |tabs| tabs.close_tab(&id, force)).await?;
        self.runtime.release(tab_id).await;
        Ok(())
    }

    pub async fn delete_tab(&self, tab_id: &str) -> Result<bool> {
        self.runtime.release(tab_id).await;
        let id = tab_id.to_string();
        self.blocking(move |tabs| tabs.delete_tab(&id)).await
    }

    // === Messages ===

    pub async fn add_message(&self, message: ChatMessage, tab_id: Option<&str>) -> Result<ChatMessage> {
        let tab_id = tab_id.map(str::to_string);
        self.blocking(move |tabs| tabs.add_message(message, tab_id.as_deref()))
            .await
    }

    /// Append a user message with retrieved context, then queue the reply on
    /// the tab's lane. The reply lands in the tab when the ticket completes.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        tab_id: Option<&str>,
    ) -> Result<(ChatMessage, TaskTicket)> {
        let tab_id = self.resolve_id(tab_id).await?;
        let content = content.into();

        let references = match self.retriever.retrieve(&content).await {
            Ok(references) => references,
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(tab_id = %tab_id, error = %reason, "Context retrieval failed");
                Vec::new()
            }
        };

        let message = ChatMessage::user(content.clone()).with_context_refs(references);
        let message = self.add_message(message, Some(&tab_id)).await?;

        let ticket = self
            .runtime
            .submit(
                &tab_id,
                TaskKind::AiResponse,
                json!({ "message_id": message.id, "prompt": content }),
            )
            .await?;

        Ok((message, ticket))
    }

    /// Queue a context refresh; `query` defaults to the latest user message
    pub async fn update_context(
        &self,
        tab_id: Option<&str>,
        query: Option<String>,
    ) -> Result<TaskTicket> {
        let tab_id = self.resolve_id(tab_id).await?;
        let payload = match query {
            Some(query) => json!({ "query": query }),
            None => json!({}),
        };
        Ok(self
            .runtime
            .submit(&tab_id, TaskKind::ContextUpdate, payload)
            .await?)
    }

    /// Queue reading a file into the tab as a context message
    pub async fn attach_file(
        &self,
        tab_id: Option<&str>,
        path: impl Into<PathBuf>,
    ) -> Result<TaskTicket> {
        let tab_id = self.resolve_id(tab_id).await?;
        let path = path.into();
        Ok(self
            .runtime
            .submit(
                &tab_id,
                TaskKind::FileOperation,
                json!({ "path": path.display().to_string() }),
            )
            .await?)
    }

    // === Checkpoints ===

    pub async fn create_checkpoint(
        &self,
        tab_id: Option<&str>,
        checkpoint_type: CheckpointType,
        description: Option<String>,
    ) -> Result<ChatCheckpoint> {
        let tab_id = tab_id.map(str::to_string);
        self.blocking(move |tabs| {
            tabs.create_checkpoint(tab_id.as_deref(), checkpoint_type, description)
        })
        .await
    }

    pub async fn restore_checkpoint(&self, checkpoint_id: &str) -> Result<ChatTab> {
        let checkpoint_id = checkpoint_id.to_string();
        self.blocking(move |tabs| tabs.restore_checkpoint(&checkpoint_id))
            .await
    }

    pub fn list_checkpoints(&self, tab_id: Option<&str>) -> Result<Vec<CheckpointSummary>> {
        self.tabs.list_checkpoints(tab_id)
    }

    // === Reads and edits ===

    pub async fn get_tab(&self, tab_id: &str) -> Result<ChatTab> {
        let tab_id = tab_id.to_string();
        self.blocking(move |tabs| tabs.get_tab(&tab_id)).await
    }

    pub fn active_tab(&self) -> Option<ChatTab> {
        self.tabs.active_tab()
    }

    pub fn resident_tabs(&self) -> Vec<ChatTab> {
        self.tabs.resident_tabs()
    }

    pub fn list_tabs(&self) -> Vec<TabSummary> {
        self.tabs.list_tabs()
    }

    pub async fn rename_tab(&self, tab_id: &str, title: String) -> Result<ChatTab> {
        let tab_id = tab_id.to_string();
        self.blocking(move |tabs| tabs.rename_tab(&tab_id, title))
            .await
    }

    pub async fn update_context_state(
        &self,
        tab_id: Option<&str>,
        delta: Map<String, Value>,
    ) -> Result<ChatTab> {
        let tab_id = tab_id.map(str::to_string);
        self.blocking(move |tabs| tabs.update_context_state(tab_id.as_deref(), delta))
            .await
    }

    pub async fn set_system_prompt(&self, tab_id: Option<&str>, prompt: String) -> Result<ChatTab> {
        let tab_id = tab_id.map(str::to_string);
        self.blocking(move |tabs| tabs.set_system_prompt(tab_id.as_deref(), prompt))
            .await
    }

    // === Maintenance ===

    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.scheduler.run_once().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tabs.subscribe()
    }

    pub fn statistics(&self) -> SessionStats {
        let storage = self.tabs.store().stats();

        SessionStats {
            active_tab_id: self.tabs.active_tab_id(),
            resident_tabs: self.tabs.resident_count(),
            resident_messages: self.tabs.resident_message_count(),
            persisted_tabs: storage.tabs,
            archived_tabs: storage.archived,
            checkpoints: storage.checkpoints,
            isolated_sessions: self.runtime.session_count(),
            last_cleanup: storage.last_cleanup,
        }
    }

    pub fn tab_manager(&self) -> &TabManager {
        &self.tabs
    }

    pub fn runtime(&self) -> &IsolationRuntime {
        &self.runtime
    }

    pub fn scheduler(&self) -> &MaintenanceScheduler {
        &self.scheduler
    }

    // === Internals ===

    /// The tab a task is queued for. Only tabs the manager knows get a lane.
    async fn resolve_id(&self, tab_id: Option<&str>) -> Result<String> {
        let tab_id = match tab_id {
            Some(id) => id.to_string(),
            None => self
                .tabs
                .active_tab_id()
                .ok_or(SessionError::NoActiveTab)?,
        };

        let id = tab_id.clone();
        self.blocking(move |tabs| tabs.ensure_resident(&id)).await?;
        Ok(tab_id)
    }

    /// Run a tab-manager call on the blocking pool
    async fn blocking<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&TabManager) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tabs = self.tabs.clone();
        tokio::task::spawn_blocking(move || job(&tabs))
            .await
            .map_err(|e| SessionError::Worker(e.to_string()))?
    }
}

impl Clone for SessionManager {
    fn clone(&self) -> Self {
        Self {
            tabs: self.tabs.clone(),
            runtime: Arc::clone(&self.runtime),
            retriever: Arc::clone(&self.retriever),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        session_manager, BrokenRetriever, EchoGenerator, FailingGenerator, SlowGenerator,
        StaticRetriever,
    };
    use chatdeck_isolation::IsolationError;
    use chatdeck_tabs::{ContextReference, MessageType, TabStatus};
    use std::time::Duration;

    fn contents(tab: &ChatTab) -> Vec<&str> {
        tab.messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_restore_drops_later_messages() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session_manager(dir.path(), EchoGenerator);

        let tab = manager
            .create_new_tab(Some("Chat 1".into()), None, None)
            .await
            .unwrap();
        manager
            .add_message(ChatMessage::user("hello"), None)
            .await
            .unwrap();
        manager
            .add_message(ChatMessage::assistant("hi there", "default"), None)
            .await
            .unwrap();
        let checkpoint = manager
            .create_checkpoint(None, CheckpointType::Manual, None)
            .await
            .unwrap();
        manager
            .add_message(ChatMessage::user("bye"), None)
            .await
            .unwrap();

        let restored = manager.restore_checkpoint(&checkpoint.id).await.unwrap();
        assert_eq!(contents(&restored), vec!["hello", "hi there"]);

        let checkpoints = manager.list_checkpoints(Some(&tab.id)).unwrap();
        let newest = &checkpoints[0];
        assert!(newest.is_automatic);
        assert!(newest.description.contains(&checkpoint.id));
        assert_eq!(newest.message_count, 2);
    }

    #[tokio::test]
    async fn test_close_checkpoints_and_updates_index() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session_manager(dir.path(), EchoGenerator);

        let tab = manager
            .create_new_tab(Some("Closing".into()), None, None)
            .await
            .unwrap();
        manager
            .add_message(ChatMessage::user("one"), None)
            .await
            .unwrap();
        manager
            .add_message(ChatMessage::user("two"), None)
            .await
            .unwrap();
        let before = manager.list_checkpoints(Some(&tab.id)).unwrap().len();

        manager.close_tab(&tab.id, false).await.unwrap();

        let checkpoints = manager.list_checkpoints(Some(&tab.id)).unwrap();
        assert_eq!(checkpoints.len(), before + 1);
        assert!(checkpoints[0].is_automatic);
        assert_eq!(checkpoints[0].message_count, 2);

        let summary = manager
            .list_tabs()
            .into_iter()
            .find(|t| t.id == tab.id)
            .unwrap();
        assert_eq!(summary.message_count, 2);
        assert!(manager.active_tab().is_none());
    }

    #[tokio::test]
    async fn test_send_message_appends_reply() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session_manager(dir.path(), EchoGenerator);
        let tab = manager.create_new_tab(None, None, None).await.unwrap();

        let (message, ticket) = manager.send_message("ping", None).await.unwrap();
        assert_eq!(message.message_type, MessageType::User);

        let delta = ticket.wait().await.unwrap();
        let reply_id = delta["last_response_id"].as_str().unwrap().to_string();

        let tab = manager.get_tab(&tab.id).await.unwrap();
        assert_eq!(contents(&tab), vec!["ping", "echo: ping"]);
        assert_eq!(tab.messages[1].id, reply_id);
        assert_eq!(tab.messages[1].message_type, MessageType::Assistant);
        assert_eq!(tab.messages[1].model.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_failed_reply_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session_manager(dir.path(), FailingGenerator);
        let tab = manager.create_new_tab(None, None, None).await.unwrap();

        let (_, ticket) = manager.send_message("ping", None).await.unwrap();
        let err = ticket.wait().await.unwrap_err();
        assert!(matches!(err, IsolationError::Operation(ref reason) if reason.contains("model unavailable")));

        let tab = manager.get_tab(&tab.id).await.unwrap();
        assert_eq!(tab.message_count(), 2);
        let error = tab.last_message().unwrap();
        assert_eq!(error.message_type, MessageType::Error);
        assert!(error.metadata.failed);

        let checkpoints = manager.list_checkpoints(Some(&tab.id)).unwrap();
        assert_eq!(checkpoints[0].checkpoint_type, CheckpointType::ErrorState);
    }

    #[tokio::test]
    async fn test_retrieved_context_attached_to_message() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = StaticRetriever(vec![
            ContextReference::new("low.md", 0.2),
            ContextReference::new("high.md", 0.9),
        ]);
        let manager = SessionManager::with_retriever(
            Store::open(dir.path()).unwrap(),
            SessionConfig::default(),
            Arc::new(EchoGenerator),
            Arc::new(retriever),
        );
        manager.create_new_tab(None, None, None).await.unwrap();

        let (message, ticket) = manager.send_message("find docs", None).await.unwrap();
        assert_eq!(message.context_refs[0].reference, "high.md");
        ticket.wait().await.unwrap();

        let refreshed = manager
            .update_context(None, Some("docs".into()))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(refreshed["context_query"], json!("docs"));

        let tab = manager.active_tab().unwrap();
        assert_eq!(tab.context_state["context_query"], json!("docs"));
        assert_eq!(tab.context_state["context_refs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retrieval_failure_does_not_block_append() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::with_retriever(
            Store::open(dir.path()).unwrap(),
            SessionConfig::default(),
            Arc::new(EchoGenerator),
            Arc::new(BrokenRetriever),
        );
        manager.create_new_tab(None, None, None).await.unwrap();

        let (message, ticket) = manager.send_message("hello", None).await.unwrap();
        assert!(message.context_refs.is_empty());
        ticket.wait().await.unwrap();

        let err = manager
            .update_context(None, None)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, IsolationError::Operation(_)));
    }

    #[tokio::test]
    async fn test_attach_file_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("notes.md"), "# Notes").unwrap();

        let manager = session_manager(dir.path(), EchoGenerator);
        let tab = manager
            .create_new_tab(Some("Files".into()), Some(workspace.path().to_path_buf()), None)
            .await
            .unwrap();

        let delta = manager
            .attach_file(None, "notes.md")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(delta["last_file"].as_str().unwrap().ends_with("notes.md"));

        let tab = manager.get_tab(&tab.id).await.unwrap();
        let attached = tab.last_message().unwrap();
        assert_eq!(attached.message_type, MessageType::Context);
        assert_eq!(attached.content, "# Notes");

        let missing = manager
            .attach_file(None, "missing.md")
            .await
            .unwrap()
            .wait()
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_reply_does_not_block_other_tabs() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session_manager(dir.path(), SlowGenerator(Duration::from_millis(1_000)));
        let slow = manager.create_new_tab(Some("Slow".into()), None, None).await.unwrap();
        let fast = manager.create_new_tab(Some("Fast".into()), None, None).await.unwrap();

        let (_, pending) = manager.send_message("wait", Some(&slow.id)).await.unwrap();

        // Appends to other tabs go through while the reply is generating
        let started = std::time::Instant::now();
        for i in 0..5 {
            manager
                .add_message(ChatMessage::user(format!("m{i}")), Some(&fast.id))
                .await
                .unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(800));

        pending.wait().await.unwrap();
        let slow = manager.get_tab(&slow.id).await.unwrap();
        assert_eq!(contents(&slow), vec!["wait", "slow: wait"]);
    }

    #[tokio::test]
    async fn test_initialize_hydrates_and_shutdown_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = {
            let manager = session_manager(dir.path(), EchoGenerator);
            let first = manager.create_new_tab(Some("First".into()), None, None).await.unwrap();
            let second = manager.create_new_tab(Some("Second".into()), None, None).await.unwrap();
            manager
                .add_message(ChatMessage::user("remember me"), Some(&first.id))
                .await
                .unwrap();
            manager.shutdown().await;
            (first, second)
        };

        let manager = session_manager(dir.path(), EchoGenerator);
        let active = manager.initialize().await.unwrap().unwrap();

        // The most recently accessed tab wins; the append touched `first`
        assert_eq!(active.id, first.id);
        assert_eq!(contents(&active), vec!["remember me"]);
        assert_eq!(
            manager.get_tab(&second.id).await.unwrap().status,
            TabStatus::Background
        );
        assert!(manager.scheduler().is_running());

        let stats = manager.statistics();
        assert_eq!(stats.resident_tabs, 2);
        assert_eq!(stats.persisted_tabs, 2);
        assert_eq!(stats.active_tab_id, Some(first.id));

        manager.shutdown().await;
        assert!(!manager.scheduler().is_running());

        assert!(matches!(
            manager.initialize().await,
            Err(SessionError::ShutDown)
        ));
        assert!(!manager.scheduler().is_running());
    }

    #[tokio::test]
    async fn test_operations_without_active_tab() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session_manager(dir.path(), EchoGenerator);

        assert!(manager.initialize().await.unwrap().is_none());
        assert!(matches!(
            manager.send_message("hello", None).await,
            Err(SessionError::NoActiveTab)
        ));
        assert!(matches!(
            manager
                .create_checkpoint(None, CheckpointType::Manual, None)
                .await,
            Err(SessionError::NoActiveTab)
        ));
        assert!(matches!(
            manager.switch_to_tab("missing").await,
            Err(SessionError::NotFound(_))
        ));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_tab_gets_no_lane() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::default();
        config.isolation.max_sessions = 1;
        let manager = SessionManager::new(
            Store::open(dir.path()).unwrap(),
            config,
            Arc::new(SlowGenerator(Duration::from_millis(300))),
        );
        let tab = manager.create_new_tab(None, None, None).await.unwrap();
        let (_, pending) = manager.send_message("wait", None).await.unwrap();

        assert!(matches!(
            manager
                .update_context(Some("no-such-tab"), Some("docs".into()))
                .await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            manager.attach_file(Some("no-such-tab"), "notes.md").await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            manager.send_message("hello", Some("no-such-tab")).await,
            Err(SessionError::NotFound(_))
        ));
        assert_eq!(manager.runtime().active_tab_ids(), vec![tab.id.clone()]);

        // The real tab's reply is unaffected
        pending.wait().await.unwrap();
        let tab = manager.get_tab(&tab.id).await.unwrap();
        assert_eq!(contents(&tab), vec!["wait", "slow: wait"]);
    }

    #[tokio::test]
    async fn test_close_releases_isolated_lane() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session_manager(dir.path(), EchoGenerator);
        let tab = manager.create_new_tab(None, None, None).await.unwrap();

        let (_, ticket) = manager.send_message("hi", None).await.unwrap();
        ticket.wait().await.unwrap();
        assert!(manager.runtime().contains(&tab.id));

        manager.close_tab(&tab.id, false).await.unwrap();
        assert!(!manager.runtime().contains(&tab.id));
        assert_eq!(manager.statistics().isolated_sessions, 0);
    }
}
