use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use super::PromptRunner;
use crate::domain::prompt::{PromptCatalog, PromptMessage, WRITE_ARTICLE};
use crate::domain::tool::{required_string, CopilotTool, TextModelRouter, ToolCallContext, ToolError};
use crate::domain::DomainError;

const NAME: &str = "doc_compose";

/// Drafts a new markdown document from a description
pub struct DocComposeTool {
    runner: PromptRunner,
}

impl DocComposeTool {
    pub fn new(prompts: Arc<dyn PromptCatalog>, router: Arc<dyn TextModelRouter>) -> Self {
        Self {
            runner: PromptRunner::new(prompts, router),
        }
    }

    async fn compose(&self, user_prompt: &str, ctx: &ToolCallContext) -> Result<String, DomainError> {
        let prompt = self.runner.require(WRITE_ARTICLE).await?;
        let mut messages = prompt.finish(&HashMap::new())?;
        messages.push(PromptMessage::user(user_prompt));
        self.runner.run(&prompt, messages, ctx).await
    }
}

#[async_trait]
impl CopilotTool for DocComposeTool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Write a new document with markdown content. This tool creates structured markdown \
         content for documents including titles, sections, and formatting."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "The title of the document"},
                "userPrompt": {
                    "type": "string",
                    "description": "The user description of the document, used to generate it"
                }
            },
            "required": ["title", "userPrompt"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let title = required_string(NAME, &args, "title")?;
        let user_prompt = required_string(NAME, &args, "userPrompt")?;

        let markdown = self.compose(&user_prompt, ctx).await.map_err(|e| {
            error!(title = %title, error = %e, "Failed to write document");
            ToolError::new("Doc Write Failed", e.to_string())
        })?;

        Ok(json!({
            "title": title,
            "wordCount": markdown.split_whitespace().count(),
            "markdown": markdown,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prompt::{InMemoryPromptCatalog, PromptRole};
    use crate::domain::tool::MockTextModelRouter;

    #[tokio::test]
    async fn test_doc_compose_counts_words() {
        let mut router = MockTextModelRouter::new();
        router.expect_has_model().returning(|model| model == "gpt-4.1");
        router
            .expect_generate_text()
            .withf(|model, messages, _| {
                model == "gpt-4.1"
                    && messages.len() == 2
                    && messages[0].role == PromptRole::System
                    && messages[1].content == "a post about rust"
            })
            .returning(|_, _, _| Ok("# Rust\n\nFast and  safe.".to_string()));

        let tool = DocComposeTool::new(Arc::new(InMemoryPromptCatalog::with_builtin()), Arc::new(router));
        let result = tool
            .execute(
                json!({"title": "Rust", "userPrompt": "a post about rust"}),
                &ToolCallContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            json!({"title": "Rust", "markdown": "# Rust\n\nFast and  safe.", "wordCount": 5})
        );
    }

    #[tokio::test]
    async fn test_doc_compose_without_provider() {
        let mut router = MockTextModelRouter::new();
        router.expect_has_model().returning(|_| false);

        let tool = DocComposeTool::new(Arc::new(InMemoryPromptCatalog::with_builtin()), Arc::new(router));
        let error = tool
            .execute(json!({"title": "t", "userPrompt": "p"}), &ToolCallContext::default())
            .await
            .unwrap_err();

        assert_eq!(error.name, "Doc Write Failed");
        assert!(error.message.contains("Provider not found"));
    }
}
