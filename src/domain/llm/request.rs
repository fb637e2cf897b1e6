use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ChatMessage;

/// A tool as declared to a vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolDeclaration {
    /// Executed by the host; parameters is a JSON schema
    Function {
        name: String,
        description: String,
        parameters: Value,
    },
    /// Executed by the vendor; the declaration is passed through verbatim
    Native { name: String, declaration: Value },
}

impl ToolDeclaration {
    pub fn name(&self) -> &str {
        match self {
            Self::Function { name, .. } | Self::Native { name, .. } => name,
        }
    }
}

/// One vendor call, after normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDeclaration>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning: bool,
}

impl ChatRequest {
    pub fn builder() -> ChatRequestBuilder {
        ChatRequestBuilder::default()
    }
}

/// Builder for ChatRequest
#[derive(Debug, Default)]
pub struct ChatRequestBuilder {
    request: ChatRequest,
}

impl ChatRequestBuilder {
    pub fn system(mut self, system: Option<String>) -> Self {
        self.request.system = system;
        self
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.request.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.request.messages = messages;
        self
    }

    pub fn tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.request.tools = tools;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.request.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.request.max_tokens = Some(max_tokens);
        self
    }

    pub fn reasoning(mut self, reasoning: bool) -> Self {
        self.request.reasoning = reasoning;
        self
    }

    pub fn build(self) -> ChatRequest {
        self.request
    }
}
