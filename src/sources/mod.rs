// src/sources/mod.rs
pub mod rss;
pub mod scheduler;

use anyhow::Result;

/// Raw document pulled from an external news portal, before
/// fingerprinting and moderation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ScrapedDocument {
    pub source_url: String,
    pub title: String,
    pub body: String,
    pub category: String,
    pub published_at: u64, // unix seconds
}

/// External collaborator boundary: fetch + extraction live behind this
/// trait so the pipeline never touches the network directly.
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<ScrapedDocument>>;
    fn name(&self) -> &str;
}
