//! Chat messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    System,
    Context,
    Error,
    Checkpoint,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::System => "system",
            MessageType::Context => "context",
            MessageType::Error => "error",
            MessageType::Checkpoint => "checkpoint",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reference supplied by the context retriever, ranked by relevance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextReference {
    /// Opaque locator (file path, document id, URL...)
    pub reference: String,
    /// Always finite once attached to a message. JSON has no NaN, so a
    /// stored `null` reads back as 0.
    #[serde(deserialize_with = "relevance_or_zero")]
    pub relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl ContextReference {
    pub fn new(reference: impl Into<String>, relevance: f64) -> Self {
        Self {
            reference: reference.into(),
            relevance: finite_or_zero(relevance),
            excerpt: None,
        }
    }
}

fn finite_or_zero(relevance: f64) -> f64 {
    if relevance.is_finite() {
        relevance
    } else {
        0.0
    }
}

fn relevance_or_zero<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let relevance = Option::<f64>::deserialize(deserializer)?;
    Ok(relevance.map_or(0.0, finite_or_zero))
}

/// Immutable once appended to a tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_refs: Vec<ContextReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    /// Set on assistant messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatMessage {
    pub fn new(message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            content: content.into(),
            created_at: Utc::now(),
            metadata: Metadata::default(),
            context_refs: Vec::new(),
            token_count: None,
            model: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageType::User, content)
    }

    pub fn assistant(content: impl Into<String>, model: impl Into<String>) -> Self {
        let mut message = Self::new(MessageType::Assistant, content);
        message.model = Some(model.into());
        message
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach retrieved references, highest relevance first. Scores that are
    /// not finite count as 0.
    pub fn with_context_refs(mut self, mut refs: Vec<ContextReference>) -> Self {
        for reference in &mut refs {
            reference.relevance = finite_or_zero(reference.relevance);
        }
        refs.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        self.context_refs = refs;
        self
    }

    pub fn with_token_count(mut self, token_count: u32) -> Self {
        self.token_count = Some(token_count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_carries_model() {
        let message = ChatMessage::assistant("hi there", "gpt-4o-mini");
        assert_eq!(message.message_type, MessageType::Assistant);
        assert_eq!(message.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_context_refs_sorted_by_relevance() {
        let message = ChatMessage::user("where is main?").with_context_refs(vec![
            ContextReference::new("src/lib.rs", 0.2),
            ContextReference::new("src/main.rs", 0.9),
        ]);

        assert_eq!(message.context_refs[0].reference, "src/main.rs");
        assert_eq!(message.context_refs[1].reference, "src/lib.rs");
    }

    #[test]
    fn test_non_finite_relevance_reads_back() {
        let mut inf = ContextReference::new("inf.md", 0.5);
        inf.relevance = f64::INFINITY;
        let message = ChatMessage::user("q").with_context_refs(vec![
            ContextReference::new("nan.md", f64::NAN),
            inf,
            ContextReference::new("ok.md", 0.4),
        ]);

        assert_eq!(message.context_refs[0].reference, "ok.md");
        assert!(message.context_refs.iter().all(|r| r.relevance.is_finite()));

        let raw = serde_json::to_string(&message).unwrap();
        let loaded: ChatMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded, message);

        // Records written before scores were sanitized
        let stored: ContextReference =
            serde_json::from_str(r#"{"reference": "old.md", "relevance": null}"#).unwrap();
        assert_eq!(stored.relevance, 0.0);
    }

    #[test]
    fn test_type_field_is_snake_case() {
        let message = ChatMessage::new(MessageType::Checkpoint, "saved");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "checkpoint");
    }
}
