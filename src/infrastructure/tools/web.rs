use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::domain::tool::{
    required_string, CopilotTool, ToolCallContext, ToolError, WebPage, WebSearchClient,
};

const SEARCH_NAME: &str = "web_search_exa";
const CRAWL_NAME: &str = "web_crawl_exa";

fn pages_value(pages: Vec<WebPage>) -> Result<Value, serde_json::Error> {
    serde_json::to_value(pages)
}

pub struct WebSearchTool {
    web: Arc<dyn WebSearchClient>,
}

impl WebSearchTool {
    pub fn new(web: Arc<dyn WebSearchClient>) -> Self {
        Self { web }
    }
}

#[async_trait]
impl CopilotTool for WebSearchTool {
    fn name(&self) -> &'static str {
        SEARCH_NAME
    }

    fn description(&self) -> &'static str {
        "Search the web for information"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The query to search the web for."},
                "mode": {
                    "type": "string",
                    "enum": ["MUST", "AUTO"],
                    "description": "MUST forces a fresh crawl of every hit, AUTO lets the index decide."
                }
            },
            "required": ["query", "mode"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let query = required_string(SEARCH_NAME, &args, "query")?;
        let live = args.get("mode").and_then(Value::as_str) == Some("MUST");

        let failed = |e: String| ToolError::new("Exa Search Failed", e);
        let pages = self
            .web
            .search(&query, live)
            .await
            .map_err(|e| failed(e.to_string()))?;
        pages_value(pages).map_err(|e| failed(e.to_string()))
    }
}

pub struct WebCrawlTool {
    web: Arc<dyn WebSearchClient>,
}

impl WebCrawlTool {
    pub fn new(web: Arc<dyn WebSearchClient>) -> Self {
        Self { web }
    }
}

#[async_trait]
impl CopilotTool for WebCrawlTool {
    fn name(&self) -> &'static str {
        CRAWL_NAME
    }

    fn description(&self) -> &'static str {
        "Crawl the web url for information"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to crawl (including http:// or https://)"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let url = required_string(CRAWL_NAME, &args, "url")?;

        let failed = |e: String| ToolError::new("Exa Crawl Failed", e);
        let pages = self.web.crawl(&url).await.map_err(|e| failed(e.to_string()))?;
        pages_value(pages).map_err(|e| failed(e.to_string()))
    }
}
