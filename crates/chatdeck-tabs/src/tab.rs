//! Chat tab data structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::TabError;
use crate::message::ChatMessage;
use crate::metadata::Metadata;
use crate::state::TabStatus;
use crate::Result;

pub const DEFAULT_MODEL: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTab {
    /// Unique identifier
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Bumped on every read or write that touches the tab
    pub last_accessed: DateTime<Utc>,
    /// Current status in the state machine
    pub status: TabStatus,
    /// Append-only in normal operation; order is significant
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Opaque payload owned by the context retriever
    #[serde(default)]
    pub context_state: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// The mutable part of a tab, as captured by a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabSnapshot {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context_state: Map<String, Value>,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ChatTab {
    pub fn new(
        title: impl Into<String>,
        workspace: Option<PathBuf>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(TabError::EmptyTitle);
        }

        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            title,
            created_at: now,
            last_accessed: now,
            status: TabStatus::Active,
            messages: Vec::new(),
            context_state: Map::new(),
            workspace,
            model: model.into(),
            system_prompt: String::new(),
            metadata: Metadata::default(),
        })
    }

    /// Attempt to transition to a new status
    pub fn transition_to(&mut self, new_status: TabStatus) -> Result<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(TabError::InvalidTransition {
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }

        if self.status != new_status {
            tracing::debug!(
                tab_id = %self.id,
                from = %self.status,
                to = %new_status,
                "Tab status transition"
            );
        }

        self.status = new_status;

        if new_status == TabStatus::Active {
            self.touch();
        }

        Ok(())
    }

    /// Give the tab focus
    pub fn activate(&mut self) -> Result<()> {
        self.transition_to(TabStatus::Active)
    }

    /// Move the tab to background if it is active
    pub fn blur(&mut self) -> Result<()> {
        if self.status == TabStatus::Active {
            self.transition_to(TabStatus::Background)
        } else {
            Ok(())
        }
    }

    pub fn suspend(&mut self) -> Result<()> {
        self.transition_to(TabStatus::Suspended)
    }

    pub fn archive(&mut self) -> Result<()> {
        match self.status {
            TabStatus::Active | TabStatus::Background => {
                self.blur()?;
                self.suspend()?;
                self.transition_to(TabStatus::Archived)
            }
            _ => self.transition_to(TabStatus::Archived),
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// Append a message and return the new message count
    pub fn push_message(&mut self, message: ChatMessage) -> usize {
        self.messages.push(message);
        self.touch();
        self.messages.len()
    }

    pub fn set_title(&mut self, title: String) -> Result<()> {
        if title.trim().is_empty() {
            return Err(TabError::EmptyTitle);
        }
        self.title = title;
        self.touch();
        Ok(())
    }

    /// Merge keys into the context state, replacing existing ones
    pub fn merge_context_state(&mut self, delta: Map<String, Value>) {
        for (key, value) in delta {
            self.context_state.insert(key, value);
        }
        self.touch();
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Deep copy of the mutable fields
    pub fn snapshot(&self) -> TabSnapshot {
        TabSnapshot {
            messages: self.messages.clone(),
            context_state: self.context_state.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Replace every mutable field with the snapshot's; nothing is merged
    pub fn restore(&mut self, snapshot: TabSnapshot) {
        let TabSnapshot {
            messages,
            context_state,
            model,
            system_prompt,
            metadata,
        } = snapshot;

        self.messages = messages;
        self.context_state = context_state;
        self.model = model;
        self.system_prompt = system_prompt;
        self.metadata = metadata;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContextReference, MessageType};
    use serde_json::json;

    fn populated_tab() -> ChatTab {
        let mut tab = ChatTab::new("Chat 1", Some(PathBuf::from("/work/repo")), "gpt-4o").unwrap();
        tab.system_prompt = "Be brief.".to_string();
        tab.metadata.tags.push("rust".to_string());
        tab.push_message(ChatMessage::user("hello").with_context_refs(vec![
            ContextReference::new("src/lib.rs", 0.75),
        ]));
        tab.push_message(ChatMessage::assistant("hi there", "gpt-4o").with_token_count(3));
        tab.context_state.insert("files".to_string(), json!(["src/lib.rs"]));
        tab
    }

    #[test]
    fn test_new_tab() {
        let tab = ChatTab::new("Chat 1", None, DEFAULT_MODEL).unwrap();
        assert_eq!(tab.status, TabStatus::Active);
        assert!(tab.messages.is_empty());
        assert_eq!(tab.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_empty_title_rejected() {
        assert!(ChatTab::new("   ", None, DEFAULT_MODEL).is_err());
    }

    #[test]
    fn test_status_transitions() {
        let mut tab = ChatTab::new("Chat 1", None, DEFAULT_MODEL).unwrap();

        tab.blur().unwrap();
        assert_eq!(tab.status, TabStatus::Background);

        tab.suspend().unwrap();
        assert_eq!(tab.status, TabStatus::Suspended);

        tab.archive().unwrap();
        assert_eq!(tab.status, TabStatus::Archived);

        tab.activate().unwrap();
        assert_eq!(tab.status, TabStatus::Active);

        // Active tabs cannot be suspended without going through background
        assert!(tab.suspend().is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let tab = populated_tab();

        let json = serde_json::to_string(&tab).unwrap();
        let decoded: ChatTab = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, tab);
        assert_eq!(decoded.messages[1].message_type, MessageType::Assistant);
    }

    #[test]
    fn test_restore_replaces_wholesale() {
        let mut tab = populated_tab();
        let snapshot = tab.snapshot();

        tab.push_message(ChatMessage::user("bye"));
        tab.context_state.insert("extra".to_string(), json!(true));
        tab.system_prompt = "Be verbose.".to_string();

        tab.restore(snapshot.clone());

        assert_eq!(tab.snapshot(), snapshot);
        assert!(!tab.context_state.contains_key("extra"));
    }
}
