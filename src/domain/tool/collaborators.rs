//! Narrow interfaces tools call out through

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

use crate::domain::llm::ChatOptions;
use crate::domain::prompt::PromptMessage;
use crate::domain::DomainError;

/// Permission checks for the acting user
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessController: Send + Sync {
    async fn can_read_workspace(&self, user: &str, workspace: &str) -> Result<bool, DomainError>;

    async fn can_read_doc(
        &self,
        user: &str,
        workspace: &str,
        doc_id: &str,
    ) -> Result<bool, DomainError>;
}

/// Markdown rendering of a stored doc
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocContent {
    pub title: String,
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocReader: Send + Sync {
    async fn get_doc_markdown(
        &self,
        workspace: &str,
        doc_id: &str,
    ) -> Result<Option<DocContent>, DomainError>;
}

/// Keyword search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDoc {
    pub doc_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocKeywordIndex: Send + Sync {
    async fn search_docs(&self, workspace: &str, query: &str)
    -> Result<Vec<SearchDoc>, DomainError>;
}

/// Embedding search hit; exactly one of `doc_id` and `file_id` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub chunk: u32,
    pub content: String,
    pub distance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocSemanticIndex: Send + Sync {
    async fn match_workspace(
        &self,
        workspace: &str,
        query: &str,
        limit: usize,
        signal: CancellationToken,
    ) -> Result<Vec<ChunkMatch>, DomainError>;
}

/// A page returned by web search or crawl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebPage {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WebSearchClient: Send + Sync {
    /// `live` forces a fresh crawl of each hit
    async fn search(&self, query: &str, live: bool) -> Result<Vec<WebPage>, DomainError>;

    async fn crawl(&self, url: &str) -> Result<Vec<WebPage>, DomainError>;
}

/// Reaches the provider that serves a given model
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TextModelRouter: Send + Sync {
    async fn has_model(&self, model: &str) -> bool;

    async fn generate_text(
        &self,
        model: &str,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<String, DomainError>;
}
