use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::domain::tool::{
    required_string, AccessController, CopilotTool, DocReader, ToolCallContext, ToolError,
};

const NAME: &str = "doc_read";

/// Full markdown of one workspace doc
pub struct DocReadTool {
    access: Arc<dyn AccessController>,
    reader: Arc<dyn DocReader>,
}

impl DocReadTool {
    pub fn new(access: Arc<dyn AccessController>, reader: Arc<dyn DocReader>) -> Self {
        Self { access, reader }
    }

    /// `None` when the caller may not see the doc or it does not exist
    async fn read(&self, ctx: &ToolCallContext, doc_id: &str) -> Result<Option<Value>, ToolError> {
        let Some((user, workspace)) = ctx.scope() else {
            return Ok(None);
        };
        if doc_id.is_empty() {
            return Ok(None);
        }

        if !self
            .access
            .can_read_doc(user, workspace, doc_id)
            .await
            .map_err(failed)?
        {
            warn!(
                user = %user,
                workspace = %workspace,
                doc_id = %doc_id,
                "User cannot read doc"
            );
            return Ok(None);
        }

        let doc = self
            .reader
            .get_doc_markdown(workspace, doc_id)
            .await
            .map_err(failed)?;

        Ok(doc.map(|doc| {
            json!({
                "title": doc.title,
                "markdown": doc.markdown,
                "createdAt": doc.created_at,
                "updatedAt": doc.updated_at,
            })
        }))
    }
}

fn failed(e: impl std::fmt::Display) -> ToolError {
    ToolError::new("Doc Read Failed", e.to_string())
}

#[async_trait]
impl CopilotTool for DocReadTool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Return the complete text and basic metadata of a single document identified by docId; \
         use this when the user needs the full content of a specific file rather than a search result."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "doc_id": {"type": "string", "description": "The target doc to read"}
            },
            "required": ["doc_id"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let doc_id = required_string(NAME, &args, "doc_id")?;

        let doc = self.read(ctx, &doc_id).await.inspect_err(|e| {
            error!(doc_id = %doc_id, error = %e, "Failed to read the doc");
        })?;
        Ok(doc.unwrap_or(Value::Null))
    }
}
