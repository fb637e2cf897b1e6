use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::tool::ToolKind;

/// Options recognized by text, object, structured and rerank calls
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Abort handle threaded through the vendor call, the stream loop and tools
    pub signal: CancellationToken,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning: bool,
    pub tools: Vec<ToolKind>,
    pub user: Option<String>,
    pub workspace: Option<String>,
    pub session: Option<String>,
    /// Structured-output regeneration attempts
    pub max_retries: Option<u32>,
    pub require_content: Option<bool>,
    pub require_attachment: Option<bool>,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolKind>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_require_content(mut self, require: bool) -> Self {
        self.require_content = Some(require);
        self
    }

    pub fn with_require_attachment(mut self, require: bool) -> Self {
        self.require_attachment = Some(require);
        self
    }

    pub fn requires_content(&self) -> bool {
        self.require_content.unwrap_or(true)
    }

    pub fn requires_attachment(&self) -> bool {
        self.require_attachment.unwrap_or(false)
    }
}

pub const DEFAULT_EMBEDDING_DIMENSIONS: u32 = 256;

#[derive(Debug, Clone, Default)]
pub struct EmbeddingOptions {
    pub signal: CancellationToken,
    pub user: Option<String>,
    pub dimensions: Option<u32>,
}

impl EmbeddingOptions {
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn dimensions(&self) -> u32 {
        self.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    pub signal: CancellationToken,
    pub user: Option<String>,
    pub quality: Option<String>,
    pub seed: Option<u64>,
    /// Checkpoint override for image-to-image vendors
    pub model_name: Option<String>,
    /// LoRA weights, each `{"path": .., "scale": ..}`
    pub loras: Vec<Value>,
}

impl ImageOptions {
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_lora(mut self, lora: Value) -> Self {
        self.loras.push(lora);
        self
    }
}
