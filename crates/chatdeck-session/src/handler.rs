//! Task handler
//!
//! Runs queued tab work inside the tab's isolated lane. Tab reads and writes
//! go through the lane's worker pool; only collaborator calls are awaited
//! directly.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chatdeck_isolation::{IsolationError, StateDelta, TabTask, TaskContext, TaskHandler, TaskKind};
use chatdeck_storage::StorageError;
use chatdeck_tabs::{ChatMessage, CheckpointType, MessageType, Metadata};

use crate::collaborators::{ContextRetriever, ResponseGenerator};
use crate::tab_manager::TabManager;

type TaskResult<T> = std::result::Result<T, IsolationError>;

/// Attached file content beyond this many bytes is cut off
const MAX_ATTACHMENT_BYTES: usize = 256 * 1024;

pub struct SessionTaskHandler {
    tabs: TabManager,
    retriever: Arc<dyn ContextRetriever>,
    generator: Arc<dyn ResponseGenerator>,
    response_timeout: Duration,
}

impl SessionTaskHandler {
    pub fn new(
        tabs: TabManager,
        retriever: Arc<dyn ContextRetriever>,
        generator: Arc<dyn ResponseGenerator>,
    ) -> Self {
        let response_timeout = tabs.config().response_timeout();

        Self {
            tabs,
            retriever,
            generator,
            response_timeout,
        }
    }

    /// Run a tab-manager call on the lane's worker pool
    async fn on_pool<T, F>(&self, ctx: &TaskContext, job: F) -> TaskResult<T>
    where
        F: FnOnce(&TabManager) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tabs = self.tabs.clone();
        ctx.run_blocking(move || job(&tabs))
            .await?
            .map_err(IsolationError::operation)
    }

    /// Generate a reply and append it. A failed generation appends an error
    /// message instead and fails the task.
    async fn respond(&self, task: TabTask, ctx: TaskContext) -> TaskResult<StateDelta> {
        let tab_id = task.tab_id.clone();
        let tab = self
            .on_pool(&ctx, move |tabs| tabs.get_tab(&tab_id))
            .await?;

        let prompt = match payload_str(&task.payload, "prompt") {
            Some(prompt) => prompt.to_string(),
            None => tab
                .messages
                .iter()
                .rev()
                .find(|m| m.message_type == MessageType::User)
                .map(|m| m.content.clone())
                .ok_or_else(|| IsolationError::operation("no user message to respond to"))?,
        };

        let outcome =
            match tokio::time::timeout(self.response_timeout, self.generator.generate(&prompt, &tab))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "response generation timed out after {:?}",
                    self.response_timeout
                )),
            };

        let tab_id = task.tab_id.clone();
        match outcome {
            Ok(reply) => {
                let message = ChatMessage::assistant(reply, tab.model.clone());
                let message = self
                    .on_pool(&ctx, move |tabs| tabs.add_message(message, Some(&tab_id)))
                    .await?;

                let mut delta = StateDelta::new();
                delta.insert("last_response_id".to_string(), json!(message.id));
                Ok(delta)
            }
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(tab_id = %task.tab_id, error = %reason, "Response generation failed");

                let mut metadata = Metadata::with_source("response_generator");
                metadata.failed = true;
                let message = ChatMessage::new(MessageType::Error, reason.clone())
                    .with_metadata(metadata);
                let description = format!("Response failed: {reason}");

                self.on_pool(&ctx, move |tabs| {
                    tabs.add_message(message, Some(&tab_id))?;
                    if let Err(e) =
                        tabs.record_checkpoint(&tab_id, CheckpointType::ErrorState, description)
                    {
                        tracing::warn!(tab_id = %tab_id, error = %e, "Error checkpoint failed");
                    }
                    Ok(())
                })
                .await?;

                Err(IsolationError::Operation(reason))
            }
        }
    }

    /// Look up references for a query (the latest user message by default)
    /// and merge them into the tab's context state
    async fn refresh_context(&self, task: TabTask, ctx: TaskContext) -> TaskResult<StateDelta> {
        let query = match payload_str(&task.payload, "query") {
            Some(query) => query.to_string(),
            None => {
                let tab_id = task.tab_id.clone();
                let tab = self
                    .on_pool(&ctx, move |tabs| tabs.get_tab(&tab_id))
                    .await?;
                tab.messages
                    .iter()
                    .rev()
                    .find(|m| m.message_type == MessageType::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default()
            }
        };

        let references = self
            .retriever
            .retrieve(&query)
            .await
            .map_err(|e| IsolationError::Operation(format!("{e:#}")))?;

        let mut delta = StateDelta::new();
        delta.insert("context_query".to_string(), json!(query));
        delta.insert(
            "context_refs".to_string(),
            serde_json::to_value(&references).map_err(IsolationError::operation)?,
        );

        let tab_id = task.tab_id.clone();
        let update = delta.clone();
        let description = format!("Context updated ({} references)", references.len());
        self.on_pool(&ctx, move |tabs| {
            tabs.update_context_state(Some(&tab_id), update)?;
            if let Err(e) = tabs.record_checkpoint(&tab_id, CheckpointType::ContextChange, description)
            {
                tracing::warn!(tab_id = %tab_id, error = %e, "Context checkpoint failed");
            }
            Ok(())
        })
        .await?;

        Ok(delta)
    }

    /// Read a file (relative paths resolve against the tab's workspace) and
    /// attach its content as a context message
    async fn attach_file(&self, task: TabTask, ctx: TaskContext) -> TaskResult<StateDelta> {
        let path = payload_str(&task.payload, "path")
            .map(PathBuf::from)
            .ok_or_else(|| IsolationError::operation("file operation needs a path"))?;

        let tab_id = task.tab_id.clone();
        let (message_id, bytes, resolved) = self
            .on_pool(&ctx, move |tabs| {
                let tab = tabs.get_tab(&tab_id)?;
                let resolved = resolve_path(tab.workspace.as_deref(), &path);
                let content = std::fs::read_to_string(&resolved)
                    .map_err(|e| StorageError::io("read attachment", &resolved, e))?;
                let bytes = content.len();

                let message = ChatMessage::new(
                    MessageType::Context,
                    truncate_utf8(content, MAX_ATTACHMENT_BYTES),
                )
                .with_metadata(Metadata::with_source(resolved.display().to_string()));
                let message = tabs.add_message(message, Some(&tab_id))?;

                if let Err(e) = tabs.record_checkpoint(
                    &tab_id,
                    CheckpointType::FileChange,
                    format!("Attached {}", resolved.display()),
                ) {
                    tracing::warn!(tab_id = %tab_id, error = %e, "File checkpoint failed");
                }

                Ok((message.id, bytes, resolved))
            })
            .await?;

        tracing::debug!(
            tab_id = %task.tab_id,
            path = %resolved.display(),
            bytes,
            "Attached file"
        );

        let mut delta = StateDelta::new();
        delta.insert(
            "last_file".to_string(),
            json!(resolved.display().to_string()),
        );
        delta.insert("last_file_message_id".to_string(), json!(message_id));
        Ok(delta)
    }
}

#[async_trait]
impl TaskHandler for SessionTaskHandler {
    async fn handle(&self, task: TabTask, ctx: TaskContext) -> TaskResult<StateDelta> {
        tracing::debug!(
            tab_id = %task.tab_id,
            task_id = %task.id,
            kind = %task.kind.as_str(),
            "Handling tab task"
        );

        match task.kind {
            TaskKind::AiResponse => self.respond(task, ctx).await,
            TaskKind::ContextUpdate => self.refresh_context(task, ctx).await,
            TaskKind::FileOperation => self.attach_file(task, ctx).await,
        }
    }
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn resolve_path(workspace: Option<&Path>, path: &Path) -> PathBuf {
    match workspace {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    }
}

fn truncate_utf8(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
