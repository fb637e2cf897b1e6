use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use super::PromptRunner;
use crate::domain::prompt::{PromptCatalog, PromptMessage, PromptRole, CONVERSATION_SUMMARY};
use crate::domain::tool::{
    optional_string, CopilotTool, TextModelRouter, ToolCallContext, ToolError,
};
use crate::domain::DomainError;

const NAME: &str = "conversation_summary";
const DEFAULT_FOCUS: &str = "general";
const DEFAULT_LENGTH: &str = "detailed";
const LENGTHS: [&str; 3] = ["brief", "detailed", "comprehensive"];

fn render_conversation(messages: &[PromptMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                PromptRole::System => "system",
                PromptRole::User => "user",
                PromptRole::Assistant => "assistant",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compresses the conversation so far into a carry-forward summary
pub struct ConversationSummaryTool {
    runner: PromptRunner,
}

impl ConversationSummaryTool {
    pub fn new(prompts: Arc<dyn PromptCatalog>, router: Arc<dyn TextModelRouter>) -> Self {
        Self {
            runner: PromptRunner::new(prompts, router),
        }
    }

    async fn summarize(
        &self,
        focus: &str,
        length: &str,
        ctx: &ToolCallContext,
    ) -> Result<Result<String, ToolError>, DomainError> {
        let prompt = self.runner.prompt(CONVERSATION_SUMMARY).await?;
        let prompt = match prompt {
            Some(prompt) if self.runner.serves(&prompt).await => prompt,
            _ => {
                return Ok(Err(ToolError::new(
                    "Prompt Not Found",
                    "Failed to summarize conversation.",
                )));
            }
        };

        let params = HashMap::from([
            ("focus".to_string(), focus.to_string()),
            ("length".to_string(), length.to_string()),
            ("conversation".to_string(), render_conversation(&ctx.messages)),
        ]);
        let messages = prompt.finish(&params)?;
        self.runner.run(&prompt, messages, ctx).await.map(Ok)
    }
}

#[async_trait]
impl CopilotTool for ConversationSummaryTool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Create a concise summary of the conversation so far, capturing key topics, decisions and \
         critical details. Use it whenever the context grows long, to keep essential information \
         that might otherwise be lost to truncation in later turns."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "focus": {
                    "type": "string",
                    "description": "Optional focus area, e.g. \"technical decisions\" or \"project status\""
                },
                "length": {
                    "type": "string",
                    "enum": LENGTHS,
                    "default": DEFAULT_LENGTH,
                    "description": "brief (1-2 sentences), detailed (paragraph) or comprehensive (multiple paragraphs)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        if ctx.messages.is_empty() {
            return Err(ToolError::new(
                "No Conversation Context",
                "No messages available to summarize",
            ));
        }

        let focus = optional_string(&args, "focus").unwrap_or_else(|| DEFAULT_FOCUS.to_string());
        let length = optional_string(&args, "length")
            .filter(|l| LENGTHS.contains(&l.as_str()))
            .unwrap_or_else(|| DEFAULT_LENGTH.to_string());

        let summary = self
            .summarize(&focus, &length, ctx)
            .await
            .map_err(|e| {
                error!(
                    session = ctx.session.as_deref().unwrap_or(""),
                    error = %e,
                    "Failed to summarize conversation"
                );
                ToolError::new("Conversation Summary Failed", e.to_string())
            })??;

        Ok(json!({
            "focusArea": focus,
            "messageCount": ctx.messages.len(),
            "summary": summary,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prompt::{InMemoryPromptCatalog, MockPromptCatalog};
    use crate::domain::tool::MockTextModelRouter;

    fn ctx() -> ToolCallContext {
        ToolCallContext::default().with_messages(vec![
            PromptMessage::user("Pick a database"),
            PromptMessage::assistant("Use Postgres"),
        ])
    }

    #[tokio::test]
    async fn test_summary_renders_conversation() {
        let mut router = MockTextModelRouter::new();
        router.expect_has_model().returning(|_| true);
        router
            .expect_generate_text()
            .withf(|_, messages, _| {
                let user = &messages[1].content;
                user.contains("Focus: decisions")
                    && user.contains("Desired length: brief")
                    && user.contains("user: Pick a database\nassistant: Use Postgres")
            })
            .returning(|_, _, _| Ok("They chose Postgres.".to_string()));

        let tool = ConversationSummaryTool::new(Arc::new(InMemoryPromptCatalog::with_builtin()), Arc::new(router));
        let result = tool
            .execute(json!({"focus": "decisions", "length": "brief"}), &ctx())
            .await
            .unwrap();

        assert_eq!(result["focusArea"], "decisions");
        assert_eq!(result["messageCount"], 2);
        assert_eq!(result["summary"], "They chose Postgres.");
        assert!(result["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_summary_defaults() {
        let mut router = MockTextModelRouter::new();
        router.expect_has_model().returning(|_| true);
        router
            .expect_generate_text()
            .withf(|_, messages, _| messages[1].content.contains("Desired length: detailed"))
            .returning(|_, _, _| Ok("s".to_string()));

        let tool = ConversationSummaryTool::new(Arc::new(InMemoryPromptCatalog::with_builtin()), Arc::new(router));
        let result = tool.execute(json!({"length": "huge"}), &ctx()).await.unwrap();

        assert_eq!(result["focusArea"], "general");
    }

    #[tokio::test]
    async fn test_summary_errors() {
        let tool = ConversationSummaryTool::new(
            Arc::new(InMemoryPromptCatalog::with_builtin()),
            Arc::new(MockTextModelRouter::new()),
        );
        let error = tool
            .execute(json!({}), &ToolCallContext::default())
            .await
            .unwrap_err();
        assert_eq!(
            error,
            ToolError::new("No Conversation Context", "No messages available to summarize")
        );

        let mut catalog = MockPromptCatalog::new();
        catalog.expect_get().returning(|_| Ok(None));
        let tool = ConversationSummaryTool::new(Arc::new(catalog), Arc::new(MockTextModelRouter::new()));
        let error = tool.execute(json!({}), &ctx()).await.unwrap_err();
        assert_eq!(error.name, "Prompt Not Found");

        let mut router = MockTextModelRouter::new();
        router.expect_has_model().returning(|_| true);
        router
            .expect_generate_text()
            .returning(|_, _, _| Err(DomainError::provider_side("openai", "http_500", "down")));
        let tool = ConversationSummaryTool::new(Arc::new(InMemoryPromptCatalog::with_builtin()), Arc::new(router));
        let error = tool.execute(json!({}), &ctx()).await.unwrap_err();
        assert_eq!(error.name, "Conversation Summary Failed");
    }
}
