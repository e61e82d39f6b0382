//! Checkpoints: immutable snapshots of a tab

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tab::{ChatTab, TabSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    Auto,
    Manual,
    ContextChange,
    FileChange,
    ErrorState,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointType::Auto => "auto",
            CheckpointType::Manual => "manual",
            CheckpointType::ContextChange => "context_change",
            CheckpointType::FileChange => "file_change",
            CheckpointType::ErrorState => "error_state",
        }
    }
}

impl std::fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCheckpoint {
    pub id: String,
    pub tab_id: String,
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    pub timestamp: DateTime<Utc>,
    pub snapshot: TabSnapshot,
    pub description: String,
    /// Automatic checkpoints are evicted before manual ones
    pub is_automatic: bool,
}

impl ChatCheckpoint {
    /// Capture the tab's current state
    pub fn capture(
        tab: &ChatTab,
        checkpoint_type: CheckpointType,
        description: impl Into<String>,
        is_automatic: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tab_id: tab.id.clone(),
            checkpoint_type,
            timestamp: Utc::now(),
            snapshot: tab.snapshot(),
            description: description.into(),
            is_automatic,
        }
    }

    pub fn message_count(&self) -> usize {
        self.snapshot.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use crate::tab::DEFAULT_MODEL;

    #[test]
    fn test_capture_is_a_deep_copy() {
        let mut tab = ChatTab::new("Chat 1", None, DEFAULT_MODEL).unwrap();
        tab.push_message(ChatMessage::user("hello"));

        let checkpoint = ChatCheckpoint::capture(&tab, CheckpointType::Manual, "before edit", false);
        tab.push_message(ChatMessage::user("bye"));

        assert_eq!(checkpoint.tab_id, tab.id);
        assert_eq!(checkpoint.message_count(), 1);
        assert!(!checkpoint.is_automatic);
    }

    #[test]
    fn test_type_serializes_snake_case() {
        let tab = ChatTab::new("Chat 1", None, DEFAULT_MODEL).unwrap();
        let checkpoint =
            ChatCheckpoint::capture(&tab, CheckpointType::ContextChange, "context", true);
        let value = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(value["type"], "context_change");
    }
}
