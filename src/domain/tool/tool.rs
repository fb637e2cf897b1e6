//! Host-side tool contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::domain::llm::{ChatOptions, ToolDeclaration};
use crate::domain::prompt::PromptMessage;

/// Failure folded into a tool result instead of ending the stream.
///
/// Serializes as `{"type":"error","name":..,"message":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "error")]
pub struct ToolError {
    pub name: String,
    pub message: String,
}

impl ToolError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ToolError {}

/// Ambient state of the chat turn a tool runs in
#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    pub workspace: Option<String>,
    pub user: Option<String>,
    pub session: Option<String>,
    pub signal: CancellationToken,
    /// Conversation so far, for tools that look back at it
    pub messages: Vec<PromptMessage>,
}

impl ToolCallContext {
    pub fn from_options(options: &ChatOptions) -> Self {
        Self {
            workspace: options.workspace.clone(),
            user: options.user.clone(),
            session: options.session.clone(),
            signal: options.signal.clone(),
            messages: Vec::new(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<PromptMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// User and workspace, when both are known
    pub fn scope(&self) -> Option<(&str, &str)> {
        Some((self.user.as_deref()?, self.workspace.as_deref()?))
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// How a provider treats one tool name when a tool set is built
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOverride {
    /// Use the vendor's own equivalent instead
    Native { name: String, declaration: Value },
    /// Leave the tool out
    Skip,
}

/// A callable the model can reach through a tool call
#[async_trait]
pub trait CopilotTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<Value, ToolError>;

    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::Function {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Arguments must be a JSON object
pub fn args_object<'a>(tool: &str, args: &'a Value) -> Result<&'a Map<String, Value>, ToolError> {
    args.as_object()
        .ok_or_else(|| ToolError::new(invalid_args(tool), "expected JSON object arguments"))
}

pub fn required_string(tool: &str, args: &Value, key: &str) -> Result<String, ToolError> {
    args_object(tool, args)?
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            ToolError::new(
                invalid_args(tool),
                format!("missing required string: '{}'", key),
            )
        })
}

pub fn optional_string(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn invalid_args(tool: &str) -> String {
    format!("Invalid {} Arguments", tool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_error_shape() {
        let error = ToolError::new("Doc Read Failed", "boom");
        assert_eq!(
            error.to_value(),
            json!({"type": "error", "name": "Doc Read Failed", "message": "boom"})
        );
    }

    #[test]
    fn test_context_scope() {
        let options = ChatOptions::new().with_user("u1").with_workspace("w1");
        let ctx = ToolCallContext::from_options(&options);
        assert_eq!(ctx.scope(), Some(("u1", "w1")));
        assert_eq!(ToolCallContext::default().scope(), None);
    }

    #[test]
    fn test_argument_helpers() {
        let args = json!({"query": "rust", "empty": ""});
        assert_eq!(required_string("doc_read", &args, "query").unwrap(), "rust");
        assert_eq!(optional_string(&args, "empty"), None);

        let error = required_string("doc_read", &args, "doc_id").unwrap_err();
        assert_eq!(error.name, "Invalid doc_read Arguments");
        assert!(args_object("x", &json!("text")).is_err());
    }
}
