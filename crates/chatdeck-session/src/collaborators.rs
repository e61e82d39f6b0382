//! Contracts for the external collaborators

use async_trait::async_trait;

use chatdeck_tabs::{ChatTab, ContextReference};

/// Supplies references relevant to a piece of text, best first.
/// An empty result is normal; errors never block a message append.
#[async_trait]
pub trait ContextRetriever: Send + Sync + 'static {
    async fn retrieve(&self, text: &str) -> anyhow::Result<Vec<ContextReference>>;
}

/// Produces assistant replies. May be slow or fail; only ever called from a
/// tab's isolated lane.
#[async_trait]
pub trait ResponseGenerator: Send + Sync + 'static {
    async fn generate(&self, prompt: &str, tab: &ChatTab) -> anyhow::Result<String>;
}

/// Retriever used when no retrieval backend is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

#[async_trait]
impl ContextRetriever for NoContext {
    async fn retrieve(&self, _text: &str) -> anyhow::Result<Vec<ContextReference>> {
        Ok(Vec::new())
    }
}
