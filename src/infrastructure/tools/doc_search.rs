use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::tool::{
    required_string, AccessController, ChunkMatch, CopilotTool, DocKeywordIndex,
    DocSemanticIndex, ToolCallContext, ToolError,
};
use crate::domain::DomainError;

const KEYWORD_NAME: &str = "doc_keyword_search";
const SEMANTIC_NAME: &str = "doc_semantic_search";
const SEMANTIC_LIMIT: usize = 10;

/// Metadata lines the embedding pipeline prepends to file chunks
const METADATA_PREFIXES: [&str; 5] = [
    "Title: ",
    "Created at: ",
    "Updated at: ",
    "Created by: ",
    "Updated by: ",
];
const MAX_METADATA_LINES: usize = 5;

fn query_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": description}
        },
        "required": ["query"]
    })
}

/// Keep only the items whose doc the user may read, preserving order
async fn readable<T, F>(
    access: &dyn AccessController,
    user: &str,
    workspace: &str,
    items: Vec<T>,
    doc_id: F,
) -> Result<Vec<T>, DomainError>
where
    F: Fn(&T) -> &str,
{
    let allowed = try_join_all(
        items
            .iter()
            .map(|item| access.can_read_doc(user, workspace, doc_id(item))),
    )
    .await?;

    Ok(items
        .into_iter()
        .zip(allowed)
        .filter_map(|(item, ok)| ok.then_some(item))
        .collect())
}

/// Term-based lookup over the workspace's doc index
pub struct DocKeywordSearchTool {
    access: Arc<dyn AccessController>,
    index: Arc<dyn DocKeywordIndex>,
}

impl DocKeywordSearchTool {
    pub fn new(access: Arc<dyn AccessController>, index: Arc<dyn DocKeywordIndex>) -> Self {
        Self { access, index }
    }

    async fn search(&self, ctx: &ToolCallContext, query: &str) -> Result<Value, DomainError> {
        let Some((user, workspace)) = ctx.scope() else {
            return Ok(Value::Null);
        };
        if query.trim().is_empty() {
            return Ok(Value::Null);
        }
        if !self.access.can_read_workspace(user, workspace).await? {
            warn!(user = %user, workspace = %workspace, "User cannot read workspace");
            return Ok(Value::Null);
        }

        let docs = self.index.search_docs(workspace, query).await?;
        let docs = readable(self.access.as_ref(), user, workspace, docs, |d| {
            d.doc_id.as_str()
        })
        .await?;
        debug!(workspace = %workspace, hits = docs.len(), "Keyword search finished");

        Ok(Value::Array(
            docs.into_iter()
                .map(|doc| {
                    json!({
                        "docId": doc.doc_id,
                        "title": doc.title,
                        "createdAt": doc.created_at,
                        "updatedAt": doc.updated_at,
                    })
                })
                .collect(),
        ))
    }
}

#[async_trait]
impl CopilotTool for DocKeywordSearchTool {
    fn name(&self) -> &'static str {
        KEYWORD_NAME
    }

    fn description(&self) -> &'static str {
        "Fuzzy search all workspace documents for the exact keyword or phrase supplied and return \
         passages ranked by textual match. Use this tool by default whenever a straightforward \
         term-based or keyword-based lookup is sufficient."
    }

    fn parameters(&self) -> Value {
        query_schema("The query to search for, e.g. \"meeting notes\" or \"project plan\".")
    }

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let query = required_string(KEYWORD_NAME, &args, "query")?;
        self.search(ctx, &query)
            .await
            .map_err(|e| ToolError::new("Doc Keyword Search Failed", e.to_string()))
    }
}

/// Drop the leading run of metadata lines from an embedded chunk
pub fn clear_embedding_chunk(content: &str) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let skip = lines
        .iter()
        .take(MAX_METADATA_LINES)
        .take_while(|line| METADATA_PREFIXES.iter().any(|p| line.starts_with(p)))
        .count();
    lines[skip..].join("\n")
}

/// Meaning-level lookup over the workspace's embeddings
pub struct DocSemanticSearchTool {
    access: Arc<dyn AccessController>,
    index: Arc<dyn DocSemanticIndex>,
}

impl DocSemanticSearchTool {
    pub fn new(access: Arc<dyn AccessController>, index: Arc<dyn DocSemanticIndex>) -> Self {
        Self { access, index }
    }

    async fn search(&self, ctx: &ToolCallContext, query: &str) -> Result<Value, DomainError> {
        let scope = ctx.scope().filter(|_| !query.trim().is_empty());
        let Some((user, workspace)) = scope else {
            return Ok(Value::from("Invalid search parameters."));
        };
        if !self.access.can_read_workspace(user, workspace).await? {
            warn!(user = %user, workspace = %workspace, "User cannot read workspace");
            return Ok(Value::from(
                "You do not have permission to access this workspace.",
            ));
        }

        let chunks = self
            .index
            .match_workspace(workspace, query, SEMANTIC_LIMIT, ctx.signal.clone())
            .await?;
        let (doc_chunks, file_chunks): (Vec<ChunkMatch>, Vec<ChunkMatch>) =
            chunks.into_iter().partition(|c| c.doc_id.is_some());

        let doc_chunks = readable(self.access.as_ref(), user, workspace, doc_chunks, |c| {
            c.doc_id.as_deref().unwrap_or_default()
        })
        .await?;

        if doc_chunks.is_empty() && file_chunks.is_empty() {
            return Ok(Value::from(format!("No results found for \"{}\".", query)));
        }

        let results: Vec<ChunkMatch> = file_chunks
            .into_iter()
            .map(|chunk| ChunkMatch {
                content: clear_embedding_chunk(&chunk.content),
                ..chunk
            })
            .chain(doc_chunks)
            .collect();
        debug!(workspace = %workspace, hits = results.len(), "Semantic search finished");

        serde_json::to_value(results).map_err(|e| DomainError::internal(e.to_string()))
    }
}

#[async_trait]
impl CopilotTool for DocSemanticSearchTool {
    fn name(&self) -> &'static str {
        SEMANTIC_NAME
    }

    fn description(&self) -> &'static str {
        "Retrieve conceptually related passages by performing vector-based semantic similarity \
         search across embedded documents; use this tool only when exact keyword search fails or \
         the user explicitly needs meaning-level matches (e.g., paraphrases, synonyms, broader \
         concepts, recent documents)."
    }

    fn parameters(&self) -> Value {
        query_schema(
            "The query statement to search for, e.g. \"What is the capital of France?\". \
             When querying specific terms or IDs, provide the complete string instead of separating it with delimiters.",
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError> {
        let query = required_string(SEMANTIC_NAME, &args, "query")?;
        self.search(ctx, &query)
            .await
            .map_err(|e| ToolError::new("Doc Semantic Search Failed", e.to_string()))
    }
}
