//! Copilot provider adapters and the streaming plumbing they share

mod anthropic;
mod deepseek;
mod factory;
mod fal;
mod gemini;
pub mod http_client;
mod morph;
mod normalizer;
mod openai;
mod openai_compat;
mod perplexity;
mod pipeline;
mod sse;
mod structured;
mod tool_loop;

pub use anthropic::AnthropicProvider;
pub use deepseek::DeepSeekProvider;
pub use factory::{FactoryTextRouter, ProviderFactory};
pub use fal::FalProvider;
pub use gemini::GeminiProvider;
pub use http_client::{ByteStream, HttpClient, HttpClientTrait, MultipartFile, MultipartForm};
pub use morph::MorphProvider;
pub use normalizer::{
    infer_mime_type, NormalizeOptions, NormalizedPrompt, RequestNormalizer,
    EMPTY_CONTENT_PLACEHOLDER,
};
pub use openai::OpenAiProvider;
pub use perplexity::PerplexityProvider;
pub use pipeline::{collect_text, into_object_stream, into_text_stream};
pub use sse::{sse_messages, SseMessage, SseStream};
pub use structured::{parse_structured, repair_json_text};
pub use tool_loop::{run_tool_loop, ChatBackend, ChunkStream, MAX_STEPS};
