use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use super::PromptRunner;
use crate::domain::prompt::{PromptCatalog, CODE_ARTIFACT};
use crate::domain::tool::{required_string, CopilotTool, TextModelRouter, ToolCallContext, ToolError};
use crate::domain::DomainError;

const NAME: &str = "code_artifact";
const FENCE: &str = "```";

/// Remove a surrounding ``` or ```html fence from a generated file
pub fn strip_code_fence(content: &str) -> &str {
    let mut stripped = content.trim();
    if stripped.starts_with(FENCE) {
        if let Some(newline) = stripped.find('\n') {
            stripped = &stripped[newline + 1..];
        }
        stripped = stripped.strip_suffix(FENCE).unwrap_or(stripped);
    }
    stripped
}

/// Generates a self-contained single-file HTML page
pub struct CodeArtifactTool {
    runner: PromptRunner,
}

impl CodeArtifactTool {
    pub fn new(prompts: Arc<dyn PromptCatalog>, router: Arc<dyn TextModelRouter>) -> Self {
        Self {
            runner: PromptRunner::new(prompts, router),
        }
    }

    async fn generate(&self, user_prompt: &str, ctx: &ToolCallContext) -> Result<String, DomainError> {
        let prompt = self.runner.require(CODE_ARTIFACT).await?;
        let params = HashMap::from([("content".to_string(), user_prompt.to_string())]);
        let messages = prompt.finish(&params)?;
        self.runner.run(&prompt, messages, ctx).await
    }
}

#[async_trait]
impl CopilotTool for CodeArtifactTool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Generate a single-file HTML snippet (with inline <style> and <script>) that accomplishes \
         the requested functionality. The page must run when saved as an .html file and opened in \
         a browser. Do not reference external CSS, JS or images except through data URIs."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "The title of the HTML page"},
                "userPrompt": {
                    "type": "string",
                    "description": "The user description of the code artifact, used to generate it"
                }
            },
            "required": ["title", "userPrompt"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let title = required_string(NAME, &args, "title")?;
        let user_prompt = required_string(NAME, &args, "userPrompt")?;

        let content = self.generate(&user_prompt, ctx).await.map_err(|e| {
            error!(title = %title, error = %e, "Failed to compose code artifact");
            ToolError::new("Code Artifact Failed", e.to_string())
        })?;

        let html = strip_code_fence(&content);
        Ok(json!({
            "title": title,
            "html": html,
            "size": html.len(),
        }))
    }
}
