//! Vendor-neutral model capabilities, messages and the provider contract

mod capability;
mod message;
mod options;
mod provider;
mod request;
mod response;

pub use capability::{
    find_valid_model, select_model, InputModality, ModelCapability, ModelSelectionQuery,
    OutputModality, ProviderModel,
};
pub use message::{ChatMessage, ContentPart, MediaSource, MessageRole};
pub use options::{ChatOptions, EmbeddingOptions, ImageOptions, DEFAULT_EMBEDDING_DIMENSIONS};
pub use provider::{CopilotProvider, ImageStream, ObjectStream, ProviderType, TextStream};
pub use request::{ChatRequest, ChatRequestBuilder, ToolDeclaration};
pub use response::{FinishReason, Usage};

#[cfg(test)]
pub use provider::mock::MockCopilotProvider;
