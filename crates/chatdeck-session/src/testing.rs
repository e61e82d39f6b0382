//! Collaborator doubles shared by the unit tests

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chatdeck_storage::Store;
use chatdeck_tabs::{ChatTab, ContextReference};

use crate::collaborators::{ContextRetriever, ResponseGenerator};
use crate::config::SessionConfig;
use crate::manager::SessionManager;
use crate::tab_manager::TabManager;

pub(crate) fn tab_manager(root: &Path) -> TabManager {
    TabManager::new(Store::open(root).unwrap(), SessionConfig::default())
}

pub(crate) fn session_manager(root: &Path, generator: impl ResponseGenerator) -> SessionManager {
    SessionManager::new(
        Store::open(root).unwrap(),
        SessionConfig::default(),
        Arc::new(generator),
    )
}

/// Replies with the prompt it was given
pub(crate) struct EchoGenerator;

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str, _tab: &ChatTab) -> anyhow::Result<String> {
        Ok(format!("echo: {prompt}"))
    }
}

pub(crate) struct FailingGenerator;

#[async_trait]
impl ResponseGenerator for FailingGenerator {
    async fn generate(&self, _prompt: &str, _tab: &ChatTab) -> anyhow::Result<String> {
        anyhow::bail!("model unavailable")
    }
}

/// Sleeps before replying
pub(crate) struct SlowGenerator(pub Duration);

#[async_trait]
impl ResponseGenerator for SlowGenerator {
    async fn generate(&self, prompt: &str, _tab: &ChatTab) -> anyhow::Result<String> {
        tokio::time::sleep(self.0).await;
        Ok(format!("slow: {prompt}"))
    }
}

pub(crate) struct StaticRetriever(pub Vec<ContextReference>);

#[async_trait]
impl ContextRetriever for StaticRetriever {
    async fn retrieve(&self, _text: &str) -> anyhow::Result<Vec<ContextReference>> {
        Ok(self.0.clone())
    }
}

pub(crate) struct BrokenRetriever;

#[async_trait]
impl ContextRetriever for BrokenRetriever {
    async fn retrieve(&self, _text: &str) -> anyhow::Result<Vec<ContextReference>> {
        anyhow::bail!("index offline")
    }
}
