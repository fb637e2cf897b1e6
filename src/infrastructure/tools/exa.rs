use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use crate::domain::tool::{WebPage, WebSearchClient};
use crate::domain::DomainError;
use crate::infrastructure::llm::HttpClientTrait;

const DEFAULT_EXA_BASE_URL: &str = "https://api.exa.ai";
const SEARCH_RESULTS: u32 = 10;
const CRAWL_MAX_CHARACTERS: u32 = 100_000;

#[derive(Debug, Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExaResult {
    url: String,
    title: Option<String>,
    summary: Option<String>,
    text: Option<String>,
    favicon: Option<String>,
    published_date: Option<String>,
    author: Option<String>,
}

impl ExaResult {
    fn into_page(self, content: Option<String>) -> WebPage {
        WebPage {
            title: self.title,
            url: self.url,
            content,
            favicon: self.favicon,
            published_date: self.published_date,
            author: self.author,
        }
    }
}

/// Exa search and contents API
#[derive(Debug)]
pub struct ExaClient<C: HttpClientTrait + 'static> {
    client: Arc<C>,
    api_key: String,
    base_url: String,
}

impl<C: HttpClientTrait + 'static> ExaClient<C> {
    pub fn new(client: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_EXA_BASE_URL)
    }

    pub fn with_base_url(
        client: Arc<C>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        vec![
            ("x-api-key", self.api_key.as_str()),
            ("Content-Type", "application/json"),
        ]
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<ExaResponse, DomainError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post_json(&url, self.headers(), &body)
            .await
            .map_err(|e| {
                let e = e.for_provider("exa");
                error!(url = %url, error = %e, "Exa request failed");
                e
            })?;

        serde_json::from_value(response).map_err(|e| {
            DomainError::provider_side("exa", "unexpected_response", e.to_string())
        })
    }
}

#[async_trait]
impl<C: HttpClientTrait + 'static> WebSearchClient for ExaClient<C> {
    async fn search(&self, query: &str, live: bool) -> Result<Vec<WebPage>, DomainError> {
        let mut body = json!({
            "query": query,
            "numResults": SEARCH_RESULTS,
            "contents": {"summary": true},
        });
        if live {
            body["contents"]["livecrawl"] = json!("always");
        }

        let response = self.post("search", body).await?;
        debug!(query = %query, live, hits = response.results.len(), "Exa search finished");

        Ok(response
            .results
            .into_iter()
            .map(|mut r| {
                let summary = r.summary.take();
                r.into_page(summary)
            })
            .collect())
    }

    async fn crawl(&self, url: &str) -> Result<Vec<WebPage>, DomainError> {
        let body = json!({
            "urls": [url],
            "livecrawl": "always",
            "text": {"maxCharacters": CRAWL_MAX_CHARACTERS},
        });

        let response = self.post("contents", body).await?;
        Ok(response
            .results
            .into_iter()
            .map(|mut r| {
                let text = r.text.take();
                r.into_page(text)
            })
            .collect())
    }
}
