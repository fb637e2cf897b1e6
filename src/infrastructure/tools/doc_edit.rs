use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::PromptRunner;
use crate::domain::prompt::{PromptCatalog, APPLY_UPDATES};
use crate::domain::tool::{
    args_object, optional_string, AccessController, CopilotTool, DocReader, TextModelRouter,
    ToolCallContext, ToolError,
};
use crate::domain::DomainError;

const NAME: &str = "doc_edit";

const DESCRIPTION: &str = "Propose block-level edits to a structured Markdown document. \
Every block starts with a comment such as <!-- block_id=... flavour=... --> and is one editable unit \
(heading, paragraph, list item, code). A faster model applies the edits, so state each change clearly \
and keep unchanged text to a minimum. If the markdown you have carries no block_id comments, call \
doc_read first.\n\n\
Return a list of independent changes in code_edit. Each entry performs exactly one isolated change and \
must not include the effect of any other entry, so entries can be applied in any order. Supported \
operations: replace a block's content keeping its block_id; delete a block with \
<!-- delete block_id=xxx --> using only ids present in the original; insert a new block with a fresh, \
non-conflicting block_id. Do not reformat or reorder blocks unless asked. Each top-level list item is \
its own block.\n\n\
Specify doc_id or origin_content before the other arguments.";

const NOT_FOUND: &str = "Prompt not found";
const NOT_SUPPORTED: &str = "Editing docs is not supported";
const NO_CONTENT: &str = "Doc not found or doc is empty";
const APPLY_FAILED: &str = "Failed to apply edit to the doc";

/// One independent change proposed by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEdit {
    pub op: String,
    pub updates: String,
}

/// `code_edit` arrives as an array or, from some models, as a JSON string of one
pub fn parse_code_edits(value: &Value) -> Result<Vec<CodeEdit>, ToolError> {
    let parsed = match value {
        Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|e| ToolError::new("Invalid doc_edit Arguments", format!("code_edit: {}", e)))
}

/// Applies model-proposed block edits through the apply-updates prompt
pub struct DocEditTool {
    runner: PromptRunner,
    access: Option<Arc<dyn AccessController>>,
    reader: Option<Arc<dyn DocReader>>,
}

impl DocEditTool {
    pub fn new(
        prompts: Arc<dyn PromptCatalog>,
        router: Arc<dyn TextModelRouter>,
        access: Option<Arc<dyn AccessController>>,
        reader: Option<Arc<dyn DocReader>>,
    ) -> Self {
        Self {
            runner: PromptRunner::new(prompts, router),
            access,
            reader,
        }
    }

    /// Trimmed markdown of a stored doc the caller may read
    async fn doc_content(
        &self,
        ctx: &ToolCallContext,
        doc_id: Option<&str>,
    ) -> Result<Option<String>, DomainError> {
        let (Some(doc_id), Some((user, workspace)), Some(access), Some(reader)) =
            (doc_id, ctx.scope(), &self.access, &self.reader)
        else {
            return Ok(None);
        };

        if !access.can_read_doc(user, workspace, doc_id).await? {
            warn!(user = %user, doc_id = %doc_id, "User cannot read doc for editing");
            return Ok(None);
        }

        Ok(reader
            .get_doc_markdown(workspace, doc_id)
            .await?
            .map(|doc| doc.markdown.trim().to_string())
            .filter(|markdown| !markdown.is_empty()))
    }

    async fn apply(
        &self,
        args: &Value,
        edits: &[CodeEdit],
        ctx: &ToolCallContext,
    ) -> Result<Value, DomainError> {
        let Some(prompt) = self.runner.prompt(APPLY_UPDATES).await? else {
            return Ok(Value::from(NOT_FOUND));
        };
        if !self.runner.serves(&prompt).await {
            return Ok(Value::from(NOT_SUPPORTED));
        }

        let content = match optional_string(args, "origin_content") {
            Some(content) => content,
            None => {
                let doc_id = optional_string(args, "doc_id");
                match self.doc_content(ctx, doc_id.as_deref()).await? {
                    Some(content) => content,
                    None => return Ok(Value::from(NO_CONTENT)),
                }
            }
        };

        let changed = try_join_all(edits.iter().map(|edit| {
            let params = HashMap::from([
                ("content".to_string(), content.clone()),
                ("op".to_string(), edit.op.clone()),
                ("updates".to_string(), edit.updates.clone()),
            ]);
            let runner = &self.runner;
            let prompt = &prompt;
            async move {
                match prompt.finish(&params) {
                    Ok(messages) => runner.run(prompt, messages, ctx).await,
                    Err(e) => Err(DomainError::from(e)),
                }
            }
        }))
        .await?;
        debug!(edits = edits.len(), "Applied doc edits");

        let result: Vec<Value> = edits
            .iter()
            .zip(changed)
            .map(|(edit, changed)| {
                json!({
                    "op": edit.op,
                    "updates": edit.updates,
                    "originalContent": content,
                    "changedContent": changed,
                })
            })
            .collect();
        Ok(json!({ "result": result }))
    }
}

#[async_trait]
impl CopilotTool for DocEditTool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "doc_id": {
                    "type": "string",
                    "description": "ID of the stored document being edited. Leave empty when editing ad-hoc Markdown passed in origin_content."
                },
                "origin_content": {
                    "type": "string",
                    "description": "The full original Markdown including every block_id comment. Required when doc_id is not given."
                },
                "instructions": {
                    "type": "string",
                    "description": "A short first-person summary of the intended edit, e.g. \"I will translate the steps into English.\""
                },
                "code_edit": {
                    "type": "array",
                    "description": "Independent semantic changes to apply to the document.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "op": {"type": "string", "description": "Short description of the change, such as \"Bold intro name\""},
                            "updates": {"type": "string", "description": "Markdown block fragments for the change, including block_id and flavour"}
                        },
                        "required": ["op", "updates"]
                    }
                }
            },
            "required": ["instructions", "code_edit"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let fields = args_object(NAME, &args)?;
        let edits = parse_code_edits(fields.get("code_edit").unwrap_or(&Value::Null))?;

        match self.apply(&args, &edits, ctx).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "Doc edit failed");
                Ok(Value::from(APPLY_FAILED))
            }
        }
    }
}
