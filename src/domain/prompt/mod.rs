//! Prompt messages, validation and the prompt catalog

mod builtin;
mod entity;
mod message;
mod repository;
mod template;
mod validation;

pub use builtin::{builtin_prompts, APPLY_UPDATES, CODE_ARTIFACT, CONVERSATION_SUMMARY, WRITE_ARTICLE};
pub use entity::{Prompt, PromptConfig};
pub use message::{Attachment, PromptMessage, PromptRole};
pub use repository::in_memory::InMemoryPromptCatalog;
pub use repository::PromptCatalog;
pub use template::{render_template, PromptTemplate, PromptVariable, TemplateError};
pub use validation::{check_embedding_input, check_params};

#[cfg(test)]
pub use repository::MockPromptCatalog;
