//! Tab Manager
//!
//! Owns the resident set of tabs and writes every mutation through to the store.
//! Lifecycle transitions (create, switch, close, delete, eviction) are serialized;
//! appends and checkpoints only take the affected tab's lock, so two tabs never
//! wait on each other.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use chatdeck_storage::{CheckpointSummary, Store, TabSummary};
use chatdeck_tabs::{ChatCheckpoint, ChatMessage, ChatTab, CheckpointType, TabStatus};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::Result;

type TabHandle = Arc<Mutex<ChatTab>>;

pub struct TabManager {
    /// Resident tabs, each behind its own lock
    tabs: Arc<RwLock<HashMap<String, TabHandle>>>,
    active_tab_id: Arc<RwLock<Option<String>>>,
    /// Held for the duration of a lifecycle transition
    transitions: Arc<Mutex<()>>,
    store: Store,
    config: Arc<SessionConfig>,
    events: broadcast::Sender<SessionEvent>,
}

impl TabManager {
    pub fn new(store: Store, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            tabs: Arc::new(RwLock::new(HashMap::new())),
            active_tab_id: Arc::new(RwLock::new(None)),
            transitions: Arc::new(Mutex::new(())),
            store,
            config: Arc::new(config),
            events,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Load up to `limit` of the most recently accessed tabs as background
    /// tabs, then activate the newest. Unreadable records are skipped.
    pub fn hydrate_recent(&self, limit: usize) -> Result<Option<ChatTab>> {
        let _guard = self.transitions.lock();
        let mut newest: Option<String> = None;

        for summary in self.store.list_tabs().into_iter().take(limit) {
            match self.store.load_tab(&summary.id) {
                Ok(Some(mut tab)) => {
                    tab.blur()?;
                    newest.get_or_insert_with(|| tab.id.clone());
                    self.insert_resident(tab);
                }
                Ok(None) => {
                    tracing::warn!(tab_id = %summary.id, "Indexed tab has no record");
                }
                Err(e) => {
                    tracing::warn!(tab_id = %summary.id, error = %e, "Skipping unreadable tab");
                }
            }
        }

        let Some(tab_id) = newest else {
            tracing::info!("No persisted tabs to hydrate");
            return Ok(None);
        };

        let tab = self.activate_locked(&tab_id)?;

        tracing::info!(
            resident = self.resident_count(),
            active_tab = %tab.id,
            "Hydrated tabs"
        );

        Ok(Some(tab))
    }

    // === Lifecycle ===

    /// Create, persist and activate a new tab. The previous active tab moves
    /// to background and the new tab gets an initial automatic checkpoint.
    pub fn create_tab(
        &self,
        title: Option<String>,
        workspace: Option<PathBuf>,
        model: Option<String>,
    ) -> Result<ChatTab> {
        let _guard = self.transitions.lock();

        let title = title.unwrap_or_else(|| format!("Chat {}", self.store.list_tabs().len() + 1));
        let model = model.unwrap_or_else(|| self.config.default_model.clone());
        let mut tab = ChatTab::new(title, workspace, model)?;
        while self.is_resident(&tab.id) || self.store.tab_exists(&tab.id) {
            tab.id = Uuid::new_v4().to_string();
        }

        self.store.save_tab(&tab)?;

        let previous = self.demote_active();
        self.insert_resident(tab.clone());
        *self.active_tab_id.write() = Some(tab.id.clone());

        self.auto_checkpoint(&tab, CheckpointType::Auto, "Initial checkpoint".to_string());

        tracing::info!(
            tab_id = %tab.id,
            title = %tab.title,
            previous = ?previous,
            "Created new tab"
        );
        self.emit(SessionEvent::TabCreated {
            tab_id: tab.id.clone(),
        });

        Ok(tab)
    }

    /// Make `tab_id` the active tab, loading it (or reviving it from the
    /// archive) if it is not resident. Switching to the active tab only
    /// refreshes its access time.
    pub fn switch_to_tab(&self, tab_id: &str) -> Result<ChatTab> {
        let _guard = self.transitions.lock();
        self.revive(tab_id)?;
        self.activate_locked(tab_id)
    }

    /// Remove a tab from the resident set. Unless `force` is set, a tab with
    /// messages gets a final checkpoint first. Closing the active tab promotes
    /// the most recently accessed remaining tab.
    pub fn close_tab(&self, tab_id: &str, force: bool) -> Result<()> {
        let _guard = self.transitions.lock();

        let handle = self
            .resident(tab_id)
            .ok_or_else(|| SessionError::NotFound(tab_id.to_string()))?;

        {
            let mut tab = handle.lock();
            if !force && tab.message_count() > 0 {
                self.auto_checkpoint(
                    &tab,
                    CheckpointType::Auto,
                    "Final checkpoint before close".to_string(),
                );
            }

            let mut closed = tab.clone();
            closed.blur()?;
            self.store.save_tab(&closed)?;
            *tab = closed;
        }

        self.tabs.write().remove(tab_id);
        let promoted = self.release_active(tab_id);

        tracing::info!(tab_id = %tab_id, force, promoted = ?promoted, "Closed tab");
        self.emit(SessionEvent::TabClosed {
            tab_id: tab_id.to_string(),
        });

        Ok(())
    }

    /// Remove a tab everywhere: resident set, records and checkpoints
    pub fn delete_tab(&self, tab_id: &str) -> Result<bool> {
        let _guard = self.transitions.lock();

        let was_resident = self.tabs.write().remove(tab_id).is_some();
        self.release_active(tab_id);
        let removed = self.store.delete_tab(tab_id)? || was_resident;

        if removed {
            tracing::info!(tab_id = %tab_id, "Deleted tab");
            self.emit(SessionEvent::TabDeleted {
                tab_id: tab_id.to_string(),
            });
        }

        Ok(removed)
    }

    // === Messages ===

    /// Append a message to `tab_id` (the active tab when `None`) and persist
    /// the tab. Every Nth message triggers an automatic checkpoint.
    pub fn add_message(&self, message: ChatMessage, tab_id: Option<&str>) -> Result<ChatMessage> {
        let (tab_id, handle) = self.resolve(tab_id).inspect_err(|e| {
            tracing::warn!(error = %e, "Dropping message for unresolved tab");
        })?;

        let mut tab = handle.lock();
        let count = tab.push_message(message.clone());
        if let Err(e) = self.store.save_tab(&tab) {
            tab.messages.pop();
            return Err(e.into());
        }

        let interval = self.config.auto_checkpoint_interval;
        if interval > 0 && count % interval == 0 {
            self.auto_checkpoint(
                &tab,
                CheckpointType::Auto,
                format!("Auto checkpoint after {count} messages"),
            );
        }
        drop(tab);

        tracing::debug!(
            tab_id = %tab_id,
            message_id = %message.id,
            message_type = %message.message_type.as_str(),
            count,
            "Added message"
        );
        self.emit(SessionEvent::MessageAdded {
            tab_id,
            message_id: message.id.clone(),
        });

        Ok(message)
    }

    // === Checkpoints ===

    /// Capture the tab's state on request. These count as manual checkpoints
    /// for eviction whatever their type.
    pub fn create_checkpoint(
        &self,
        tab_id: Option<&str>,
        checkpoint_type: CheckpointType,
        description: Option<String>,
    ) -> Result<ChatCheckpoint> {
        let (_, handle) = self.resolve(tab_id)?;
        let mut tab = handle.lock();
        tab.touch();
        let description =
            description.unwrap_or_else(|| format!("{} checkpoint", checkpoint_type.as_str()));

        self.checkpoint_locked(&tab, checkpoint_type, description, false)
    }

    /// Capture an automatic checkpoint for a system-triggered event
    pub fn record_checkpoint(
        &self,
        tab_id: &str,
        checkpoint_type: CheckpointType,
        description: String,
    ) -> Result<ChatCheckpoint> {
        let handle = self.handle(tab_id)?;
        let tab = handle.lock();
        self.checkpoint_locked(&tab, checkpoint_type, description, true)
    }

    /// Replace the tab's state with the checkpoint's, loading the tab (or
    /// reviving it from the archive) if it is not resident. The state being
    /// replaced and the restored state are both checkpointed, so a restore can
    /// be undone.
    pub fn restore_checkpoint(&self, checkpoint_id: &str) -> Result<ChatTab> {
        let checkpoint = self
            .store
            .load_checkpoint(checkpoint_id)?
            .ok_or_else(|| SessionError::CheckpointNotFound(checkpoint_id.to_string()))?;

        let _guard = self.transitions.lock();
        let handle = self.revive(&checkpoint.tab_id)?;
        let mut tab = handle.lock();

        self.auto_checkpoint(
            &tab,
            CheckpointType::Auto,
            format!("Before restoring checkpoint {checkpoint_id}"),
        );

        let mut restored = tab.clone();
        restored.restore(checkpoint.snapshot.clone());
        self.store.save_tab(&restored)?;
        *tab = restored.clone();

        self.auto_checkpoint(
            &tab,
            CheckpointType::Auto,
            format!(
                "Restored from checkpoint {checkpoint_id} ({})",
                checkpoint.description
            ),
        );
        drop(tab);

        tracing::info!(
            tab_id = %restored.id,
            checkpoint_id = %checkpoint_id,
            messages = restored.message_count(),
            "Restored checkpoint"
        );
        self.emit(SessionEvent::CheckpointRestored {
            tab_id: restored.id.clone(),
            checkpoint_id: checkpoint_id.to_string(),
        });

        Ok(restored)
    }

    /// Checkpoint summaries for a tab (the active tab when `None`), newest first
    pub fn list_checkpoints(&self, tab_id: Option<&str>) -> Result<Vec<CheckpointSummary>> {
        let tab_id = match tab_id {
            Some(id) => id.to_string(),
            None => self.active_tab_id().ok_or(SessionError::NoActiveTab)?,
        };
        if let Some(handle) = self.resident(&tab_id) {
            handle.lock().touch();
        }
        Ok(self.store.checkpoint_summaries(&tab_id))
    }

    // === Reads and edits ===

    /// Load the tab into the resident set if it is not there yet. Fails with
    /// `NotFound` for ids that are not in primary storage.
    pub fn ensure_resident(&self, tab_id: &str) -> Result<()> {
        self.handle(tab_id).map(|_| ())
    }

    pub fn get_tab(&self, tab_id: &str) -> Result<ChatTab> {
        let handle = self.handle(tab_id)?;
        let mut tab = handle.lock();
        tab.touch();
        Ok(tab.clone())
    }

    pub fn active_tab(&self) -> Option<ChatTab> {
        let tab_id = self.active_tab_id()?;
        let handle = self.resident(&tab_id)?;
        let tab = handle.lock().clone();
        Some(tab)
    }

    pub fn active_tab_id(&self) -> Option<String> {
        self.active_tab_id.read().clone()
    }

    /// Resident tabs, most recently accessed first
    pub fn resident_tabs(&self) -> Vec<ChatTab> {
        let mut tabs: Vec<ChatTab> = self
            .handles()
            .into_iter()
            .map(|(_, handle)| {
                let tab = handle.lock().clone();
                tab
            })
            .collect();
        tabs.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        tabs
    }

    pub fn resident_count(&self) -> usize {
        self.tabs.read().len()
    }

    pub fn is_resident(&self, tab_id: &str) -> bool {
        self.tabs.read().contains_key(tab_id)
    }

    /// Every persisted tab, most recently accessed first
    pub fn list_tabs(&self) -> Vec<TabSummary> {
        self.store.list_tabs()
    }

    pub fn rename_tab(&self, tab_id: &str, title: String) -> Result<ChatTab> {
        self.mutate(Some(tab_id), |tab| Ok(tab.set_title(title)?))
    }

    /// Merge keys into the tab's context state (the active tab when `None`)
    pub fn update_context_state(
        &self,
        tab_id: Option<&str>,
        delta: Map<String, Value>,
    ) -> Result<ChatTab> {
        self.mutate(tab_id, |tab| {
            tab.merge_context_state(delta);
            Ok(())
        })
    }

    pub fn set_system_prompt(&self, tab_id: Option<&str>, prompt: String) -> Result<ChatTab> {
        self.mutate(tab_id, |tab| {
            tab.system_prompt = prompt;
            tab.touch();
            Ok(())
        })
    }

    /// Persist every resident tab
    pub fn persist_all(&self) -> usize {
        let mut failures = 0;
        for (tab_id, handle) in self.handles() {
            let tab = handle.lock();
            if let Err(e) = self.store.save_tab(&tab) {
                tracing::error!(tab_id = %tab_id, error = %e, "Failed to persist tab");
                failures += 1;
            }
        }
        failures
    }

    // === Maintenance ===

    /// Resident tabs the retention sweep must not archive
    pub fn protected_tab_ids(&self) -> HashSet<String> {
        self.handles()
            .into_iter()
            .filter(|(_, handle)| {
                matches!(
                    handle.lock().status,
                    TabStatus::Active | TabStatus::Background
                )
            })
            .map(|(tab_id, _)| tab_id)
            .collect()
    }

    /// Suspend background tabs not accessed within `threshold`
    pub fn suspend_inactive(&self, threshold: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - threshold;
        let active = self.active_tab_id();
        let mut suspended = Vec::new();

        for (tab_id, handle) in self.handles() {
            if active.as_deref() == Some(tab_id.as_str()) {
                continue;
            }

            let mut tab = handle.lock();
            if tab.status != TabStatus::Background || tab.last_accessed >= cutoff {
                continue;
            }

            let mut next = tab.clone();
            if next.suspend().is_err() {
                continue;
            }
            match self.store.save_tab(&next) {
                Ok(()) => {
                    *tab = next;
                    suspended.push(tab_id);
                }
                Err(e) => {
                    tracing::warn!(tab_id = %tab_id, error = %e, "Failed to persist suspended tab");
                }
            }
        }

        if !suspended.is_empty() {
            tracing::info!(count = suspended.len(), "Suspended inactive tabs");
            self.emit(SessionEvent::TabsSuspended {
                tab_ids: suspended.clone(),
            });
        }

        suspended
    }

    /// Evict the least recently accessed suspended tabs until at most
    /// `max_resident` tabs remain resident. Active and background tabs stay.
    pub fn evict_suspended(&self, max_resident: usize) -> Vec<String> {
        let _guard = self.transitions.lock();

        let handles = self.handles();
        if handles.len() <= max_resident {
            return Vec::new();
        }
        let excess = handles.len() - max_resident;

        let mut candidates: Vec<(DateTime<Utc>, String, TabHandle)> = handles
            .into_iter()
            .filter_map(|(tab_id, handle)| {
                let tab = handle.lock();
                let evictable = tab.status.is_evictable();
                let last_accessed = tab.last_accessed;
                drop(tab);
                evictable.then_some((last_accessed, tab_id, handle))
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut evicted = Vec::new();
        for (_, tab_id, handle) in candidates.into_iter().take(excess) {
            let tab = handle.lock();
            if let Err(e) = self.store.save_tab(&tab) {
                tracing::warn!(tab_id = %tab_id, error = %e, "Keeping tab that failed to persist");
                continue;
            }
            self.tabs.write().remove(&tab_id);
            evicted.push(tab_id);
        }

        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "Evicted suspended tabs");
            self.emit(SessionEvent::TabsEvicted {
                tab_ids: evicted.clone(),
            });
        }

        evicted
    }

    /// Drop resident copies of tabs the store has archived
    pub fn forget_archived(&self, tab_ids: &[String]) -> usize {
        let _guard = self.transitions.lock();
        let mut tabs = self.tabs.write();
        tab_ids
            .iter()
            .filter(|tab_id| tabs.remove(tab_id.as_str()).is_some())
            .count()
    }

    pub fn resident_message_count(&self) -> usize {
        self.handles()
            .into_iter()
            .map(|(_, handle)| {
                let count = handle.lock().message_count();
                count
            })
            .sum()
    }

    // === Internals ===

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn handles(&self) -> Vec<(String, TabHandle)> {
        self.tabs
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect()
    }

    fn resident(&self, tab_id: &str) -> Option<TabHandle> {
        self.tabs.read().get(tab_id).cloned()
    }

    /// Insert unless already resident; the resident copy always wins
    fn insert_resident(&self, tab: ChatTab) -> TabHandle {
        let mut tabs = self.tabs.write();
        Arc::clone(
            tabs.entry(tab.id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(tab))),
        )
    }

    /// Resident handle, loading the tab from primary storage if needed
    fn handle(&self, tab_id: &str) -> Result<TabHandle> {
        if let Some(handle) = self.resident(tab_id) {
            return Ok(handle);
        }

        let mut tab = self
            .store
            .load_tab(tab_id)?
            .ok_or_else(|| SessionError::NotFound(tab_id.to_string()))?;
        tab.blur()?;

        tracing::debug!(tab_id = %tab_id, "Loaded tab into resident set");
        Ok(self.insert_resident(tab))
    }

    /// Like [`TabManager::handle`], but also brings the tab back from the archive
    fn revive(&self, tab_id: &str) -> Result<TabHandle> {
        match self.handle(tab_id) {
            Err(SessionError::NotFound(_)) => {
                let tab = self
                    .store
                    .restore_archived(tab_id)?
                    .ok_or_else(|| SessionError::NotFound(tab_id.to_string()))?;
                Ok(self.insert_resident(tab))
            }
            other => other,
        }
    }

    fn resolve(&self, tab_id: Option<&str>) -> Result<(String, TabHandle)> {
        let tab_id = match tab_id {
            Some(id) => id.to_string(),
            None => self.active_tab_id().ok_or(SessionError::NoActiveTab)?,
        };
        let handle = self.handle(&tab_id)?;
        Ok((tab_id, handle))
    }

    /// Apply an edit and persist it; the resident copy only changes if the
    /// write succeeds
    fn mutate<F>(&self, tab_id: Option<&str>, edit: F) -> Result<ChatTab>
    where
        F: FnOnce(&mut ChatTab) -> Result<()>,
    {
        let (_, handle) = self.resolve(tab_id)?;
        let mut tab = handle.lock();
        let mut next = tab.clone();
        edit(&mut next)?;
        self.store.save_tab(&next)?;
        *tab = next.clone();
        Ok(next)
    }

    /// Activate a resident or persisted tab. Callers hold the transition lock.
    fn activate_locked(&self, tab_id: &str) -> Result<ChatTab> {
        let handle = self.handle(tab_id)?;
        let previous = self.active_tab_id();

        let activated = {
            let mut tab = handle.lock();
            let mut next = tab.clone();
            next.activate()?;
            self.store.save_tab(&next)?;
            *tab = next.clone();
            next
        };

        if previous.as_deref() != Some(tab_id) {
            self.demote_active();
            *self.active_tab_id.write() = Some(tab_id.to_string());

            tracing::info!(tab_id = %tab_id, previous = ?previous, "Switched tab");
            self.emit(SessionEvent::TabSwitched {
                from: previous,
                to: tab_id.to_string(),
            });
        }

        Ok(activated)
    }

    /// Move the active tab to background. A failed write is logged; the
    /// in-memory demotion stands and the next save corrects the record.
    fn demote_active(&self) -> Option<String> {
        let previous = self.active_tab_id.write().take()?;

        if let Some(handle) = self.resident(&previous) {
            let mut tab = handle.lock();
            match tab.blur() {
                Ok(()) => {
                    if let Err(e) = self.store.save_tab(&tab) {
                        tracing::warn!(tab_id = %previous, error = %e, "Failed to persist demoted tab");
                    }
                }
                Err(e) => {
                    tracing::warn!(tab_id = %previous, error = %e, "Failed to demote tab");
                }
            }
        }

        Some(previous)
    }

    /// Clear `tab_id` as active and promote the most recently accessed
    /// resident tab in its place
    fn release_active(&self, tab_id: &str) -> Option<String> {
        {
            let mut active = self.active_tab_id.write();
            if active.as_deref() != Some(tab_id) {
                return None;
            }
            *active = None;
        }

        let next = self
            .handles()
            .into_iter()
            .map(|(id, handle)| {
                let last_accessed = handle.lock().last_accessed;
                (last_accessed, id)
            })
            .max()
            .map(|(_, id)| id)?;

        match self.activate_locked(&next) {
            Ok(_) => Some(next),
            Err(e) => {
                tracing::warn!(tab_id = %next, error = %e, "Failed to promote tab");
                None
            }
        }
    }

    /// Capture, persist and cap. Callers hold the tab's lock.
    fn checkpoint_locked(
        &self,
        tab: &ChatTab,
        checkpoint_type: CheckpointType,
        description: String,
        is_automatic: bool,
    ) -> Result<ChatCheckpoint> {
        let checkpoint = ChatCheckpoint::capture(tab, checkpoint_type, description, is_automatic);
        self.store.save_checkpoint(&checkpoint)?;
        self.enforce_checkpoint_limit(&tab.id);

        tracing::debug!(
            tab_id = %tab.id,
            checkpoint_id = %checkpoint.id,
            checkpoint_type = %checkpoint_type.as_str(),
            "Created checkpoint"
        );
        self.emit(SessionEvent::CheckpointCreated {
            tab_id: tab.id.clone(),
            checkpoint_id: checkpoint.id.clone(),
            checkpoint_type,
        });

        Ok(checkpoint)
    }

    /// Automatic checkpoints never fail the operation that triggered them
    fn auto_checkpoint(
        &self,
        tab: &ChatTab,
        checkpoint_type: CheckpointType,
        description: String,
    ) -> Option<ChatCheckpoint> {
        self.checkpoint_locked(tab, checkpoint_type, description, true)
            .inspect_err(|e| {
                tracing::warn!(tab_id = %tab.id, error = %e, "Automatic checkpoint failed");
            })
            .ok()
    }

    /// Trim to the configured cap, oldest automatic checkpoints first
    fn enforce_checkpoint_limit(&self, tab_id: &str) {
        let limit = self.config.max_checkpoints_per_tab.max(1);
        let mut summaries = self.store.checkpoint_summaries(tab_id);

        while summaries.len() > limit {
            let victim = summaries
                .iter()
                .rposition(|s| s.is_automatic)
                .unwrap_or(summaries.len() - 1);
            let summary = summaries.remove(victim);

            if let Err(e) = self.store.delete_checkpoint(&summary.id) {
                tracing::warn!(checkpoint_id = %summary.id, error = %e, "Failed to evict checkpoint");
                break;
            }
        }
    }
}

impl Clone for TabManager {
    fn clone(&self) -> Self {
        Self {
            tabs: Arc::clone(&self.tabs),
            active_tab_id: Arc::clone(&self.active_tab_id),
            transitions: Arc::clone(&self.transitions),
            store: self.store.clone(),
            config: Arc::clone(&self.config),
            events: self.events.clone(),
        }
    }
}
