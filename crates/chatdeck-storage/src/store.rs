//! Record store
//!
//! One writer per tab record is enforced by the caller (the session layer
//! holds the tab's lock while saving). The index has its own critical section
//! so unrelated tabs never queue behind each other just to update summaries.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chatdeck_tabs::{ChatCheckpoint, ChatTab};

use crate::atomic;
use crate::error::StorageError;
use crate::index::{CheckpointSummary, TabIndex, TabSummary, SCHEMA_VERSION};
use crate::layout::Layout;
use crate::Result;

/// Outcome of a retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tabs_archived: usize,
    pub checkpoints_deleted: usize,
    /// Records that could not be read or moved; they are left in place
    pub failures: usize,
    pub archived_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub tabs: usize,
    pub checkpoints: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub tabs: usize,
    pub checkpoints: usize,
    pub archived: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub schema_version: u32,
}

/// Only the fields a retention scan needs
#[derive(Deserialize)]
struct CheckpointHeader {
    id: String,
    tab_id: String,
    timestamp: DateTime<Utc>,
}

pub struct Store {
    layout: Layout,
    /// In-memory copy of the index record, written through on every change
    index: Arc<Mutex<TabIndex>>,
}

impl Store {
    /// Open (or create) a store rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let layout = Layout::new(root.as_ref());
        layout.ensure()?;

        let store = Self {
            layout,
            index: Arc::new(Mutex::new(TabIndex::default())),
        };

        let index_path = store.layout.index_path();
        match atomic::read_json::<TabIndex>(&index_path) {
            Ok(Some(index)) if index.schema_version == SCHEMA_VERSION => {
                *store.index.lock() = index;
            }
            Ok(Some(index)) if index.schema_version > SCHEMA_VERSION => {
                return Err(StorageError::UnsupportedSchema {
                    found: index.schema_version,
                    expected: SCHEMA_VERSION,
                });
            }
            Ok(Some(index)) => {
                tracing::warn!(
                    found = index.schema_version,
                    expected = SCHEMA_VERSION,
                    "Outdated index schema, rebuilding"
                );
                store.rebuild_index()?;
            }
            Ok(None) => {
                store.rebuild_index()?;
            }
            Err(e) if e.is_corrupt() => {
                tracing::warn!(error = %e, "Index record is corrupt, rebuilding");
                store.rebuild_index()?;
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            root = %store.layout.root().display(),
            tabs = store.index.lock().tabs.len(),
            "Opened store"
        );

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    // === Tabs ===

    /// Persist the full tab record, then refresh its index summary
    pub fn save_tab(&self, tab: &ChatTab) -> Result<()> {
        let path = self.layout.tab_path(&tab.id)?;
        atomic::write_json(&path, tab).inspect_err(|e| {
            tracing::warn!(tab_id = %tab.id, error = %e, "Failed to save tab");
        })?;

        self.update_index(|index| index.upsert_tab(tab));
        Ok(())
    }

    /// Load a tab from primary storage; `Ok(None)` if no record exists
    pub fn load_tab(&self, tab_id: &str) -> Result<Option<ChatTab>> {
        let path = self.layout.tab_path(tab_id)?;
        atomic::read_json(&path).inspect_err(|e| {
            tracing::warn!(tab_id = %tab_id, error = %e, "Failed to load tab");
        })
    }

    /// True if the id is taken by a primary or archived record
    pub fn tab_exists(&self, tab_id: &str) -> bool {
        let in_primary = self
            .layout
            .tab_path(tab_id)
            .map(|p| p.exists())
            .unwrap_or(false);
        let in_archive = self
            .layout
            .archive_path(tab_id)
            .map(|p| p.exists())
            .unwrap_or(false);

        in_primary || in_archive || self.index.lock().tabs.contains_key(tab_id)
    }

    /// Tab summaries from the index, most recently accessed first
    pub fn list_tabs(&self) -> Vec<TabSummary> {
        self.index.lock().tabs_by_recency()
    }

    pub fn tab_summary(&self, tab_id: &str) -> Option<TabSummary> {
        self.index.lock().tabs.get(tab_id).cloned()
    }

    /// Remove a tab permanently: its record (primary or archived), every
    /// checkpoint it owns, and its index entry
    pub fn delete_tab(&self, tab_id: &str) -> Result<bool> {
        let removed_primary = atomic::remove(&self.layout.tab_path(tab_id)?)?;
        let removed_archive = atomic::remove(&self.layout.archive_path(tab_id)?)?;

        let mut checkpoint_ids: HashSet<String> = self
            .index
            .lock()
            .checkpoints_for(tab_id)
            .into_iter()
            .map(|c| c.id)
            .collect();

        // The index is only a cache; sweep the directory for anything it missed
        for path in self.layout.record_paths(&self.layout.checkpoints_dir())? {
            match atomic::read_json::<CheckpointHeader>(&path) {
                Ok(Some(header)) if header.tab_id == tab_id => {
                    checkpoint_ids.insert(header.id);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint");
                }
            }
        }

        let mut deleted = 0;
        for checkpoint_id in &checkpoint_ids {
            match atomic::remove(&self.layout.checkpoint_path(checkpoint_id)?) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(checkpoint_id = %checkpoint_id, error = %e, "Failed to delete checkpoint");
                }
            }
        }

        let had_entry = {
            let mut removed = false;
            self.update_index(|index| {
                removed = index.remove_tab(tab_id).is_some();
                for checkpoint_id in &checkpoint_ids {
                    index.remove_checkpoint(checkpoint_id);
                }
            });
            removed
        };

        let existed = removed_primary || removed_archive || had_entry;
        if existed {
            tracing::info!(tab_id = %tab_id, checkpoints = deleted, "Deleted tab");
        }

        Ok(existed)
    }

    // === Checkpoints ===

    pub fn save_checkpoint(&self, checkpoint: &ChatCheckpoint) -> Result<()> {
        let path = self.layout.checkpoint_path(&checkpoint.id)?;
        atomic::write_json(&path, checkpoint).inspect_err(|e| {
            tracing::warn!(
                checkpoint_id = %checkpoint.id,
                tab_id = %checkpoint.tab_id,
                error = %e,
                "Failed to save checkpoint"
            );
        })?;

        self.update_index(|index| index.upsert_checkpoint(checkpoint));
        Ok(())
    }

    pub fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<ChatCheckpoint>> {
        let path = self.layout.checkpoint_path(checkpoint_id)?;
        atomic::read_json(&path).inspect_err(|e| {
            tracing::warn!(checkpoint_id = %checkpoint_id, error = %e, "Failed to load checkpoint");
        })
    }

    /// Full checkpoints of a tab, newest first. Unreadable records are skipped.
    pub fn load_checkpoints(&self, tab_id: &str) -> Result<Vec<ChatCheckpoint>> {
        let summaries = self.checkpoint_summaries(tab_id);
        let mut checkpoints = Vec::with_capacity(summaries.len());

        for summary in summaries {
            match self.load_checkpoint(&summary.id) {
                Ok(Some(checkpoint)) => checkpoints.push(checkpoint),
                Ok(None) => {
                    tracing::debug!(checkpoint_id = %summary.id, "Dropping stale index entry");
                    self.update_index(|index| {
                        index.remove_checkpoint(&summary.id);
                    });
                }
                // Already logged
                Err(_) => {}
            }
        }

        checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(checkpoints)
    }

    /// Checkpoint summaries of a tab from the index, newest first
    pub fn checkpoint_summaries(&self, tab_id: &str) -> Vec<CheckpointSummary> {
        self.index.lock().checkpoints_for(tab_id)
    }

    pub fn checkpoint_count(&self) -> usize {
        self.index.lock().checkpoints.len()
    }

    pub fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool> {
        let removed = atomic::remove(&self.layout.checkpoint_path(checkpoint_id)?)?;
        self.update_index(|index| {
            index.remove_checkpoint(checkpoint_id);
        });
        Ok(removed)
    }

    // === Retention ===

    /// Archive tabs and delete checkpoints older than `retention`
    pub fn cleanup_old_data(&self, retention: Duration) -> CleanupReport {
        self.cleanup_old_data_except(retention, &HashSet::new())
    }

    /// Same as [`Store::cleanup_old_data`], but tabs in `keep` are never archived
    pub fn cleanup_old_data_except(
        &self,
        retention: Duration,
        keep: &HashSet<String>,
    ) -> CleanupReport {
        let now = Utc::now();
        let cutoff = now - retention;
        let mut report = CleanupReport::default();

        match self.layout.record_paths(&self.layout.tabs_dir()) {
            Ok(paths) => {
                for path in paths {
                    match self.archive_if_stale(&path, cutoff, keep) {
                        Ok(Some(tab_id)) => {
                            report.tabs_archived += 1;
                            report.archived_ids.push(tab_id);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            report.failures += 1;
                            tracing::warn!(path = %path.display(), error = %e, "Skipping tab during cleanup");
                        }
                    }
                }
            }
            Err(e) => {
                report.failures += 1;
                tracing::warn!(error = %e, "Failed to list tabs during cleanup");
            }
        }

        match self.layout.record_paths(&self.layout.checkpoints_dir()) {
            Ok(paths) => {
                for path in paths {
                    match self.delete_if_expired(&path, cutoff) {
                        Ok(true) => report.checkpoints_deleted += 1,
                        Ok(false) => {}
                        Err(e) => {
                            report.failures += 1;
                            tracing::warn!(path = %path.display(), error = %e, "Skipping checkpoint during cleanup");
                        }
                    }
                }
            }
            Err(e) => {
                report.failures += 1;
                tracing::warn!(error = %e, "Failed to list checkpoints during cleanup");
            }
        }

        self.update_index(|index| index.last_cleanup = Some(now));

        tracing::info!(
            tabs_archived = report.tabs_archived,
            checkpoints_deleted = report.checkpoints_deleted,
            failures = report.failures,
            cutoff = %cutoff.to_rfc3339(),
            "Cleanup finished"
        );

        report
    }

    fn archive_if_stale(
        &self,
        path: &Path,
        cutoff: DateTime<Utc>,
        keep: &HashSet<String>,
    ) -> Result<Option<String>> {
        let Some(mut tab) = atomic::read_json::<ChatTab>(path)? else {
            return Ok(None);
        };

        if tab.last_accessed >= cutoff || keep.contains(&tab.id) {
            return Ok(None);
        }

        let last_accessed = tab.last_accessed;
        tab.archive()?;
        // Archiving is not an access
        tab.last_accessed = last_accessed;

        atomic::write_json(&self.layout.archive_path(&tab.id)?, &tab)?;
        atomic::remove(path)?;
        self.update_index(|index| {
            index.remove_tab(&tab.id);
        });

        tracing::debug!(tab_id = %tab.id, "Archived tab");
        Ok(Some(tab.id))
    }

    fn delete_if_expired(&self, path: &Path, cutoff: DateTime<Utc>) -> Result<bool> {
        let Some(header) = atomic::read_json::<CheckpointHeader>(path)? else {
            return Ok(false);
        };

        if header.timestamp >= cutoff {
            return Ok(false);
        }

        atomic::remove(path)?;
        self.update_index(|index| {
            index.remove_checkpoint(&header.id);
        });
        Ok(true)
    }

    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        self.index.lock().last_cleanup
    }

    // === Archive ===

    /// Ids of archived tabs
    pub fn list_archived(&self) -> Vec<String> {
        match self.layout.record_paths(&self.layout.archive_dir()) {
            Ok(paths) => paths.iter().filter_map(|p| record_id(p)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list archive");
                Vec::new()
            }
        }
    }

    /// Move an archived tab back into primary storage
    pub fn restore_archived(&self, tab_id: &str) -> Result<Option<ChatTab>> {
        let archive_path = self.layout.archive_path(tab_id)?;
        let Some(tab) = atomic::read_json::<ChatTab>(&archive_path)? else {
            return Ok(None);
        };

        self.save_tab(&tab)?;
        atomic::remove(&archive_path)?;

        tracing::info!(tab_id = %tab_id, "Restored tab from archive");
        Ok(Some(tab))
    }

    // === Index ===

    /// Regenerate the index by scanning every record; unreadable records are skipped
    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();
        let mut rebuilt = TabIndex::default();

        for path in self.layout.record_paths(&self.layout.tabs_dir())? {
            match atomic::read_json::<ChatTab>(&path) {
                Ok(Some(tab)) => {
                    rebuilt.upsert_tab(&tab);
                    report.tabs += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(path = %path.display(), error = %e, "Skipping tab during index rebuild");
                }
            }
        }

        for path in self.layout.record_paths(&self.layout.checkpoints_dir())? {
            match atomic::read_json::<ChatCheckpoint>(&path) {
                Ok(Some(checkpoint)) => {
                    rebuilt.upsert_checkpoint(&checkpoint);
                    report.checkpoints += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(path = %path.display(), error = %e, "Skipping checkpoint during index rebuild");
                }
            }
        }

        {
            let mut index = self.index.lock();
            rebuilt.last_cleanup = index.last_cleanup;
            *index = rebuilt;
            atomic::write_json(&self.layout.index_path(), &*index)?;
        }

        tracing::info!(
            tabs = report.tabs,
            checkpoints = report.checkpoints,
            skipped = report.skipped,
            "Rebuilt index"
        );

        Ok(report)
    }

    pub fn stats(&self) -> StorageStats {
        let archived = self.list_archived().len();
        let index = self.index.lock();
        StorageStats {
            tabs: index.tabs.len(),
            checkpoints: index.checkpoints.len(),
            archived,
            last_cleanup: index.last_cleanup,
            schema_version: index.schema_version,
        }
    }

    /// Read-modify-write of the index; last writer wins
    fn update_index<F>(&self, mutate: F)
    where
        F: FnOnce(&mut TabIndex),
    {
        let mut index = self.index.lock();
        mutate(&mut index);
        if let Err(e) = atomic::write_json(&self.layout.index_path(), &*index) {
            // The records are the source of truth; a stale index is repaired by rebuild
            tracing::warn!(error = %e, "Failed to write index");
        }
    }
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            index: Arc::clone(&self.index),
        }
    }
}

fn record_id(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdeck_tabs::{ChatMessage, CheckpointType, ContextReference, TabStatus, DEFAULT_MODEL};
    use std::fs;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    fn tab_with_messages(title: &str, contents: &[&str]) -> ChatTab {
        let mut tab = ChatTab::new(title, None, DEFAULT_MODEL).unwrap();
        for content in contents {
            tab.push_message(ChatMessage::user(*content));
        }
        tab
    }

    #[test]
    fn test_save_and_load_tab() {
        let (_dir, store) = open_store();
        let tab = tab_with_messages("Chat 1", &["hello", "hi there"]);

        store.save_tab(&tab).unwrap();

        let loaded = store.load_tab(&tab.id).unwrap().unwrap();
        assert_eq!(loaded, tab);
        assert!(store.tab_exists(&tab.id));
        assert!(store.load_tab("missing").unwrap().is_none());
    }

    #[test]
    fn test_metadata_and_retrieved_refs_load_back() {
        let (_dir, store) = open_store();
        let mut tab = tab_with_messages("Refs", &[]);

        assert!(tab.metadata.insert("failed", serde_json::json!("yes")).is_err());
        tab.metadata.insert("failed", serde_json::json!(true)).unwrap();
        tab.metadata
            .insert("editor", serde_json::json!({"line": 4}))
            .unwrap();
        tab.push_message(ChatMessage::user("q").with_context_refs(vec![
            ContextReference::new("nan.md", f64::NAN),
            ContextReference::new("ok.md", 0.7),
        ]));

        store.save_tab(&tab).unwrap();

        let loaded = store.load_tab(&tab.id).unwrap().unwrap();
        assert_eq!(loaded, tab);
        assert!(loaded.metadata.failed);
        assert_eq!(loaded.messages[0].context_refs[1].relevance, 0.0);
    }

    #[test]
    fn test_list_tabs_comes_from_index() {
        let (_dir, store) = open_store();
        let mut older = tab_with_messages("Older", &["a"]);
        older.last_accessed = Utc::now() - Duration::hours(1);
        let newer = tab_with_messages("Newer", &["a", "b", "c"]);

        store.save_tab(&older).unwrap();
        store.save_tab(&newer).unwrap();

        let tabs = store.list_tabs();
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0].id, newer.id);
        assert_eq!(tabs[0].message_count, 3);
        assert_eq!(tabs[1].id, older.id);
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let tab = tab_with_messages("Chat 1", &["hello"]);
        {
            let store = Store::open(dir.path()).unwrap();
            store.save_tab(&tab).unwrap();
        }

        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.tab_summary(&tab.id).unwrap().message_count, 1);
    }

    #[test]
    fn test_checkpoints_newest_first() {
        let (_dir, store) = open_store();
        let tab = tab_with_messages("Chat 1", &["hello"]);

        let mut first = ChatCheckpoint::capture(&tab, CheckpointType::Auto, "first", true);
        first.timestamp = Utc::now() - Duration::minutes(10);
        let second = ChatCheckpoint::capture(&tab, CheckpointType::Manual, "second", false);
        store.save_checkpoint(&first).unwrap();
        store.save_checkpoint(&second).unwrap();

        let loaded = store.load_checkpoints(&tab.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, second.id);
        assert_eq!(loaded[1].id, first.id);
        assert_eq!(store.load_checkpoint(&first.id).unwrap().unwrap(), first);
    }

    #[test]
    fn test_delete_tab_removes_checkpoints_and_index_entry() {
        let (_dir, store) = open_store();
        let tab = tab_with_messages("Chat 1", &["hello"]);
        let other = tab_with_messages("Chat 2", &["hi"]);
        store.save_tab(&tab).unwrap();
        store.save_tab(&other).unwrap();

        let checkpoint = ChatCheckpoint::capture(&tab, CheckpointType::Manual, "mine", false);
        let foreign = ChatCheckpoint::capture(&other, CheckpointType::Manual, "theirs", false);
        store.save_checkpoint(&checkpoint).unwrap();
        store.save_checkpoint(&foreign).unwrap();

        assert!(store.delete_tab(&tab.id).unwrap());

        assert!(store.load_tab(&tab.id).unwrap().is_none());
        assert!(store.load_checkpoint(&checkpoint.id).unwrap().is_none());
        assert!(store.tab_summary(&tab.id).is_none());
        assert!(store.load_checkpoint(&foreign.id).unwrap().is_some());
        assert!(!store.delete_tab(&tab.id).unwrap());
    }

    #[test]
    fn test_cleanup_archives_stale_tabs_and_deletes_old_checkpoints() {
        let (_dir, store) = open_store();
        let mut stale = tab_with_messages("Stale", &["old"]);
        stale.status = TabStatus::Suspended;
        stale.last_accessed = Utc::now() - Duration::days(40);
        let fresh = tab_with_messages("Fresh", &["new"]);
        store.save_tab(&stale).unwrap();
        store.save_tab(&fresh).unwrap();

        let mut old_checkpoint = ChatCheckpoint::capture(&stale, CheckpointType::Auto, "old", true);
        old_checkpoint.timestamp = Utc::now() - Duration::days(40);
        let recent_checkpoint =
            ChatCheckpoint::capture(&stale, CheckpointType::Manual, "recent", false);
        store.save_checkpoint(&old_checkpoint).unwrap();
        store.save_checkpoint(&recent_checkpoint).unwrap();

        let report = store.cleanup_old_data(Duration::days(30));

        assert_eq!(report.tabs_archived, 1);
        assert_eq!(report.checkpoints_deleted, 1);
        assert_eq!(report.archived_ids, vec![stale.id.clone()]);

        assert!(store.tab_summary(&stale.id).is_none());
        assert!(store.load_tab(&stale.id).unwrap().is_none());
        assert_eq!(store.list_archived(), vec![stale.id.clone()]);
        assert!(store.tab_exists(&stale.id));
        assert!(store.tab_summary(&fresh.id).is_some());

        assert!(store.load_checkpoint(&old_checkpoint.id).unwrap().is_none());
        assert!(store.load_checkpoint(&recent_checkpoint.id).unwrap().is_some());
        assert!(store.last_cleanup().is_some());
    }

    #[test]
    fn test_cleanup_respects_keep_set() {
        let (_dir, store) = open_store();
        let mut stale = tab_with_messages("Stale", &["old"]);
        stale.last_accessed = Utc::now() - Duration::days(40);
        store.save_tab(&stale).unwrap();

        let keep: HashSet<String> = [stale.id.clone()].into_iter().collect();
        let report = store.cleanup_old_data_except(Duration::days(30), &keep);

        assert_eq!(report.tabs_archived, 0);
        assert!(store.tab_summary(&stale.id).is_some());
    }

    #[test]
    fn test_cleanup_skips_corrupt_records() {
        let (_dir, store) = open_store();
        let mut stale = tab_with_messages("Stale", &["old"]);
        stale.last_accessed = Utc::now() - Duration::days(40);
        store.save_tab(&stale).unwrap();

        fs::write(store.layout().tabs_dir().join("broken.json"), b"{oops").unwrap();

        let report = store.cleanup_old_data(Duration::days(30));
        assert_eq!(report.tabs_archived, 1);
        assert_eq!(report.failures, 1);
    }

    #[test]
    fn test_archived_tab_status_and_restore() {
        let (_dir, store) = open_store();
        let mut stale = tab_with_messages("Stale", &["old"]);
        stale.status = TabStatus::Background;
        stale.last_accessed = Utc::now() - Duration::days(40);
        store.save_tab(&stale).unwrap();
        store.cleanup_old_data(Duration::days(30));

        let restored = store.restore_archived(&stale.id).unwrap().unwrap();
        assert_eq!(restored.status, TabStatus::Archived);
        assert_eq!(restored.messages, stale.messages);
        assert!(store.list_archived().is_empty());
        assert!(store.tab_summary(&stale.id).is_some());
    }

    #[test]
    fn test_rebuild_index_after_loss() {
        let dir = tempfile::tempdir().unwrap();
        let tab = tab_with_messages("Chat 1", &["hello"]);
        let checkpoint = ChatCheckpoint::capture(&tab, CheckpointType::Manual, "cp", false);
        {
            let store = Store::open(dir.path()).unwrap();
            store.save_tab(&tab).unwrap();
            store.save_checkpoint(&checkpoint).unwrap();
        }

        fs::write(dir.path().join("index.json"), b"garbage").unwrap();
        fs::write(dir.path().join("tabs").join("broken.json"), b"{").unwrap();

        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.list_tabs().len(), 1);
        assert_eq!(store.checkpoint_summaries(&tab.id).len(), 1);

        let report = store.rebuild_index().unwrap();
        assert_eq!(report.tabs, 1);
        assert_eq!(report.checkpoints, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        Store::open(dir.path()).unwrap();

        let index = TabIndex {
            schema_version: SCHEMA_VERSION + 1,
            ..TabIndex::default()
        };
        fs::write(
            dir.path().join("index.json"),
            serde_json::to_vec(&index).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            Store::open(dir.path()),
            Err(StorageError::UnsupportedSchema { .. })
        ));
    }

    #[test]
    fn test_invalid_id_never_touches_disk() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.load_tab("../escape"),
            Err(StorageError::InvalidId(_))
        ));
    }
}
