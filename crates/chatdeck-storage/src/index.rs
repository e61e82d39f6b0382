//! Index record
//!
//! Summaries of every stored tab and checkpoint so enumeration never has to
//! deserialize full records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use chatdeck_tabs::{ChatCheckpoint, ChatTab, CheckpointType, TabStatus};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabSummary {
    pub id: String,
    pub title: String,
    pub status: TabStatus,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub message_count: usize,
}

impl From<&ChatTab> for TabSummary {
    fn from(tab: &ChatTab) -> Self {
        Self {
            id: tab.id.clone(),
            title: tab.title.clone(),
            status: tab.status,
            created_at: tab.created_at,
            last_accessed: tab.last_accessed,
            message_count: tab.message_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub tab_id: String,
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub is_automatic: bool,
    pub message_count: usize,
}

impl From<&ChatCheckpoint> for CheckpointSummary {
    fn from(checkpoint: &ChatCheckpoint) -> Self {
        Self {
            id: checkpoint.id.clone(),
            tab_id: checkpoint.tab_id.clone(),
            checkpoint_type: checkpoint.checkpoint_type,
            timestamp: checkpoint.timestamp,
            description: checkpoint.description.clone(),
            is_automatic: checkpoint.is_automatic,
            message_count: checkpoint.message_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabIndex {
    pub schema_version: u32,
    #[serde(default)]
    pub last_cleanup: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tabs: BTreeMap<String, TabSummary>,
    #[serde(default)]
    pub checkpoints: BTreeMap<String, CheckpointSummary>,
}

impl Default for TabIndex {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_cleanup: None,
            tabs: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }
}

impl TabIndex {
    pub fn upsert_tab(&mut self, tab: &ChatTab) {
        self.tabs.insert(tab.id.clone(), TabSummary::from(tab));
    }

    pub fn remove_tab(&mut self, tab_id: &str) -> Option<TabSummary> {
        self.tabs.remove(tab_id)
    }

    pub fn upsert_checkpoint(&mut self, checkpoint: &ChatCheckpoint) {
        self.checkpoints
            .insert(checkpoint.id.clone(), CheckpointSummary::from(checkpoint));
    }

    pub fn remove_checkpoint(&mut self, checkpoint_id: &str) -> Option<CheckpointSummary> {
        self.checkpoints.remove(checkpoint_id)
    }

    /// Tab summaries, most recently accessed first
    pub fn tabs_by_recency(&self) -> Vec<TabSummary> {
        let mut tabs: Vec<TabSummary> = self.tabs.values().cloned().collect();
        tabs.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        tabs
    }

    /// Checkpoints of one tab, newest first
    pub fn checkpoints_for(&self, tab_id: &str) -> Vec<CheckpointSummary> {
        let mut checkpoints: Vec<CheckpointSummary> = self
            .checkpoints
            .values()
            .filter(|c| c.tab_id == tab_id)
            .cloned()
            .collect();
        checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        checkpoints
    }
}
