//! Main application state container

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use chatdeck_isolation::TaskTicket;
use chatdeck_session::{
    ContextRetriever, MaintenanceReport, NoContext, ResponseGenerator, SessionEvent,
    SessionManager, SessionStats,
};
use chatdeck_storage::{CheckpointSummary, StorageStats, Store, TabSummary};
use chatdeck_tabs::{ChatCheckpoint, ChatMessage, ChatTab, CheckpointType};

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeckStatistics {
    pub data_dir: PathBuf,
    pub initialized: bool,
    pub sessions: SessionStats,
    pub storage: StorageStats,
}

/// The chat deck
///
/// Owns the store and the session manager. Every tab operation flows
/// through here between [`Deck::initialize`] and [`Deck::shutdown`].
pub struct Deck {
    config: Config,
    store: Store,
    sessions: SessionManager,
    initialized: Arc<AtomicBool>,
    shut_down: Arc<AtomicBool>,
}

impl Deck {
    pub fn new(config: Config, generator: Arc<dyn ResponseGenerator>) -> Result<Self> {
        Self::with_retriever(config, generator, Arc::new(NoContext))
    }

    pub fn with_retriever(
        config: Config,
        generator: Arc<dyn ResponseGenerator>,
        retriever: Arc<dyn ContextRetriever>,
    ) -> Result<Self> {
        let store = Store::open(&config.data_dir)?;
        let sessions = SessionManager::with_retriever(
            store.clone(),
            config.session.clone(),
            generator,
            retriever,
        );

        Ok(Self {
            config,
            store,
            sessions,
            initialized: Arc::new(AtomicBool::new(false)),
            shut_down: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Restore recent tabs and start background maintenance. A deck that has
    /// been shut down cannot be initialized again; open a new one instead.
    pub async fn initialize(&self) -> Result<Option<ChatTab>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CoreError::ShutDown);
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(self.sessions.active_tab());
        }

        let active = self.sessions.initialize().await.inspect_err(|_| {
            self.initialized.store(false, Ordering::SeqCst);
        })?;

        tracing::info!(data_dir = %self.config.data_dir.display(), "Deck initialized");
        Ok(active)
    }

    /// Stop background work and persist every resident tab
    pub async fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shut_down.store(true, Ordering::SeqCst);
        self.sessions.shutdown().await;
        tracing::info!("Deck shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    // === Tab operations ===

    pub async fn create_tab(
        &self,
        title: Option<String>,
        workspace: Option<PathBuf>,
    ) -> Result<ChatTab> {
        self.ensure_initialized()?;
        Ok(self.sessions.create_new_tab(title, workspace, None).await?)
    }

    pub async fn switch_tab(&self, tab_id: &str) -> Result<ChatTab> {
        self.ensure_initialized()?;
        Ok(self.sessions.switch_to_tab(tab_id).await?)
    }

    pub async fn close_tab(&self, tab_id: &str, force: bool) -> Result<()> {
        self.ensure_initialized()?;
        Ok(self.sessions.close_tab(tab_id, force).await?)
    }

    pub async fn delete_tab(&self, tab_id: &str) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.sessions.delete_tab(tab_id).await?)
    }

    pub async fn rename_tab(&self, tab_id: &str, title: String) -> Result<ChatTab> {
        self.ensure_initialized()?;
        Ok(self.sessions.rename_tab(tab_id, title).await?)
    }

    pub fn active_tab(&self) -> Option<ChatTab> {
        self.sessions.active_tab()
    }

    pub async fn get_tab(&self, tab_id: &str) -> Result<ChatTab> {
        Ok(self.sessions.get_tab(tab_id).await?)
    }

    pub fn list_tabs(&self) -> Vec<TabSummary> {
        self.sessions.list_tabs()
    }

    // === Conversation ===

    pub async fn add_message(
        &self,
        message: ChatMessage,
        tab_id: Option<&str>,
    ) -> Result<ChatMessage> {
        self.ensure_initialized()?;
        Ok(self.sessions.add_message(message, tab_id).await?)
    }

    pub async fn send_message(
        &self,
        content: impl Into<String>,
        tab_id: Option<&str>,
    ) -> Result<(ChatMessage, TaskTicket)> {
        self.ensure_initialized()?;
        Ok(self.sessions.send_message(content, tab_id).await?)
    }

    pub async fn update_context(
        &self,
        tab_id: Option<&str>,
        query: Option<String>,
    ) -> Result<TaskTicket> {
        self.ensure_initialized()?;
        Ok(self.sessions.update_context(tab_id, query).await?)
    }

    pub async fn update_context_state(
        &self,
        tab_id: Option<&str>,
        delta: Map<String, Value>,
    ) -> Result<ChatTab> {
        self.ensure_initialized()?;
        Ok(self.sessions.update_context_state(tab_id, delta).await?)
    }

    pub async fn attach_file(&self, tab_id: Option<&str>, path: PathBuf) -> Result<TaskTicket> {
        self.ensure_initialized()?;
        Ok(self.sessions.attach_file(tab_id, path).await?)
    }

    // === Checkpoints ===

    pub async fn create_checkpoint(
        &self,
        tab_id: Option<&str>,
        description: Option<String>,
    ) -> Result<ChatCheckpoint> {
        self.ensure_initialized()?;
        Ok(self
            .sessions
            .create_checkpoint(tab_id, CheckpointType::Manual, description)
            .await?)
    }

    pub async fn restore_checkpoint(&self, checkpoint_id: &str) -> Result<ChatTab> {
        self.ensure_initialized()?;
        Ok(self.sessions.restore_checkpoint(checkpoint_id).await?)
    }

    pub fn list_checkpoints(&self, tab_id: Option<&str>) -> Result<Vec<CheckpointSummary>> {
        Ok(self.sessions.list_checkpoints(tab_id)?)
    }

    // === Maintenance and observation ===

    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        self.ensure_initialized()?;
        Ok(self.sessions.run_maintenance().await)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sessions.subscribe()
    }

    pub fn statistics(&self) -> DeckStatistics {
        DeckStatistics {
            data_dir: self.config.data_dir.clone(),
            initialized: self.is_initialized(),
            sessions: self.sessions.statistics(),
            storage: self.store.stats(),
        }
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CoreError::NotInitialized)
        }
    }
}
