//! Domain layer - vendor-neutral types, contracts and stream parsers

pub mod error;
pub mod llm;
pub mod prompt;
pub mod stream;
pub mod tool;

pub use error::DomainError;
pub use llm::{
    ChatMessage, ChatOptions, ChatRequest, ContentPart, CopilotProvider, EmbeddingOptions,
    FinishReason, ImageOptions, InputModality, ModelCapability, ModelSelectionQuery,
    OutputModality, ProviderModel, ProviderType, ToolDeclaration, Usage,
};
pub use prompt::{
    check_params, Attachment, InMemoryPromptCatalog, Prompt, PromptCatalog, PromptMessage,
    PromptRole, PromptTemplate, TemplateError,
};
pub use stream::{
    Citation, CitationParser, StreamChunk, StreamObject, StreamObjectParser, StreamPatternParser,
    TextStreamParser,
};
pub use tool::{
    CopilotTool, ToolCall, ToolCallContext, ToolError, ToolKind, ToolOverride, ToolSet,
};
