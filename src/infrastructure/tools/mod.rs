//! Built-in tools and the builder that assembles them per chat turn

mod builder;
mod code_artifact;
mod conversation_summary;
mod doc_compose;
mod doc_edit;
mod doc_read;
mod doc_search;
mod exa;
mod web;

pub use builder::ToolSetBuilder;
pub use code_artifact::{strip_code_fence, CodeArtifactTool};
pub use conversation_summary::ConversationSummaryTool;
pub use doc_compose::DocComposeTool;
pub use doc_edit::{parse_code_edits, CodeEdit, DocEditTool};
pub use doc_read::DocReadTool;
pub use doc_search::{clear_embedding_chunk, DocKeywordSearchTool, DocSemanticSearchTool};
pub use exa::ExaClient;
pub use web::{WebCrawlTool, WebSearchTool};

use std::sync::Arc;

use crate::domain::prompt::{Prompt, PromptCatalog, PromptMessage};
use crate::domain::tool::{TextModelRouter, ToolCallContext};
use crate::domain::DomainError;

/// Runs catalog prompts on whichever provider serves their model
#[derive(Clone)]
pub(crate) struct PromptRunner {
    prompts: Arc<dyn PromptCatalog>,
    router: Arc<dyn TextModelRouter>,
}

impl PromptRunner {
    pub(crate) fn new(prompts: Arc<dyn PromptCatalog>, router: Arc<dyn TextModelRouter>) -> Self {
        Self { prompts, router }
    }

    pub(crate) async fn prompt(&self, name: &str) -> Result<Option<Prompt>, DomainError> {
        self.prompts.get(name).await
    }

    pub(crate) async fn serves(&self, prompt: &Prompt) -> bool {
        self.router.has_model(prompt.model()).await
    }

    /// Generate once with the prompt's model and options, under the turn's signal
    pub(crate) async fn run(
        &self,
        prompt: &Prompt,
        messages: Vec<PromptMessage>,
        ctx: &ToolCallContext,
    ) -> Result<String, DomainError> {
        let options = prompt.options().with_signal(ctx.signal.clone());
        self.router
            .generate_text(prompt.model(), messages, options)
            .await
    }

    /// Load the prompt, failing when it or its provider is missing
    pub(crate) async fn require(&self, name: &str) -> Result<Prompt, DomainError> {
        let prompt = self
            .prompt(name)
            .await?
            .ok_or_else(|| DomainError::configuration("Prompt not found"))?;
        if !self.serves(&prompt).await {
            return Err(DomainError::configuration("Provider not found"));
        }
        Ok(prompt)
    }
}
