use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::code_artifact::CodeArtifactTool;
use super::conversation_summary::ConversationSummaryTool;
use super::doc_compose::DocComposeTool;
use super::doc_edit::DocEditTool;
use super::doc_read::DocReadTool;
use super::doc_search::{DocKeywordSearchTool, DocSemanticSearchTool};
use super::web::{WebCrawlTool, WebSearchTool};
use crate::domain::prompt::PromptCatalog;
use crate::domain::tool::{
    AccessController, CopilotTool, DocKeywordIndex, DocReader, DocSemanticIndex, TextModelRouter,
    ToolCallContext, ToolKind, ToolOverride, ToolSet, WebSearchClient,
};

/// Host services the built-in tools are assembled from.
///
/// Every collaborator is optional; a requested tool whose collaborators are
/// missing is left out of the set with a warning.
#[derive(Clone, Default)]
pub struct ToolSetBuilder {
    access: Option<Arc<dyn AccessController>>,
    doc_reader: Option<Arc<dyn DocReader>>,
    keyword_index: Option<Arc<dyn DocKeywordIndex>>,
    semantic_index: Option<Arc<dyn DocSemanticIndex>>,
    web: Option<Arc<dyn WebSearchClient>>,
    prompts: Option<Arc<dyn PromptCatalog>>,
    router: Option<Arc<dyn TextModelRouter>>,
}

impl fmt::Debug for ToolSetBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSetBuilder")
            .field("access", &self.access.is_some())
            .field("doc_reader", &self.doc_reader.is_some())
            .field("keyword_index", &self.keyword_index.is_some())
            .field("semantic_index", &self.semantic_index.is_some())
            .field("web", &self.web.is_some())
            .field("prompts", &self.prompts.is_some())
            .field("router", &self.router.is_some())
            .finish()
    }
}

impl ToolSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_access(mut self, access: Arc<dyn AccessController>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn with_doc_reader(mut self, reader: Arc<dyn DocReader>) -> Self {
        self.doc_reader = Some(reader);
        self
    }

    pub fn with_keyword_index(mut self, index: Arc<dyn DocKeywordIndex>) -> Self {
        self.keyword_index = Some(index);
        self
    }

    pub fn with_semantic_index(mut self, index: Arc<dyn DocSemanticIndex>) -> Self {
        self.semantic_index = Some(index);
        self
    }

    pub fn with_web(mut self, web: Arc<dyn WebSearchClient>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptCatalog>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn TextModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Assemble the tools for one chat turn.
    ///
    /// `override_fn` lets the provider swap a kind for its native tool or
    /// veto it; it is consulted before any built-in tool is created.
    pub fn build(
        &self,
        kinds: &[ToolKind],
        ctx: &ToolCallContext,
        override_fn: &dyn Fn(ToolKind) -> Option<ToolOverride>,
    ) -> ToolSet {
        let mut set = ToolSet::new();

        for &kind in kinds {
            match override_fn(kind) {
                Some(ToolOverride::Native { name, declaration }) => {
                    debug!(tool = %kind, native = %name, "Using provider native tool");
                    set.insert_native(name, declaration);
                    continue;
                }
                Some(ToolOverride::Skip) => {
                    debug!(tool = %kind, "Tool vetoed by provider");
                    continue;
                }
                None => {}
            }

            let tools = self.tools_for(kind);
            if tools.is_empty() {
                warn!(
                    tool = %kind,
                    session = ctx.session.as_deref().unwrap_or(""),
                    "Tool requested but its services are not wired, skipping"
                );
            }
            for tool in tools {
                set.insert(tool);
            }
        }

        debug!(tools = ?set.names(), "Built tool set");
        set
    }

    fn tools_for(&self, kind: ToolKind) -> Vec<Arc<dyn CopilotTool>> {
        match kind {
            ToolKind::DocRead => match (&self.access, &self.doc_reader) {
                (Some(access), Some(reader)) => {
                    single(DocReadTool::new(access.clone(), reader.clone()))
                }
                _ => Vec::new(),
            },
            ToolKind::DocKeywordSearch => match (&self.access, &self.keyword_index) {
                (Some(access), Some(index)) => single(DocKeywordSearchTool::new(
                    access.clone(),
                    index.clone(),
                )),
                _ => Vec::new(),
            },
            ToolKind::DocSemanticSearch => match (&self.access, &self.semantic_index) {
                (Some(access), Some(index)) => single(DocSemanticSearchTool::new(
                    access.clone(),
                    index.clone(),
                )),
                _ => Vec::new(),
            },
            ToolKind::DocEdit => match (&self.prompts, &self.router) {
                (Some(prompts), Some(router)) => single(DocEditTool::new(
                    prompts.clone(),
                    router.clone(),
                    self.access.clone(),
                    self.doc_reader.clone(),
                )),
                _ => Vec::new(),
            },
            ToolKind::DocCompose => match (&self.prompts, &self.router) {
                (Some(prompts), Some(router)) => {
                    single(DocComposeTool::new(prompts.clone(), router.clone()))
                }
                _ => Vec::new(),
            },
            ToolKind::CodeArtifact => match (&self.prompts, &self.router) {
                (Some(prompts), Some(router)) => {
                    single(CodeArtifactTool::new(prompts.clone(), router.clone()))
                }
                _ => Vec::new(),
            },
            ToolKind::ConversationSummary => match (&self.prompts, &self.router) {
                (Some(prompts), Some(router)) => single(ConversationSummaryTool::new(
                    prompts.clone(),
                    router.clone(),
                )),
                _ => Vec::new(),
            },
            ToolKind::WebSearch => match &self.web {
                Some(web) => vec![
                    Arc::new(WebSearchTool::new(web.clone())) as Arc<dyn CopilotTool>,
                    Arc::new(WebCrawlTool::new(web.clone())) as Arc<dyn CopilotTool>,
                ],
                None => Vec::new(),
            },
        }
    }
}

fn single(tool: impl CopilotTool + 'static) -> Vec<Arc<dyn CopilotTool>> {
    vec![Arc::new(tool) as Arc<dyn CopilotTool>]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prompt::InMemoryPromptCatalog;
    use crate::domain::tool::{MockAccessController, MockDocReader, MockTextModelRouter, MockWebSearchClient};
    use serde_json::json;

    fn no_override(_: ToolKind) -> Option<ToolOverride> {
        None
    }

    fn wired() -> ToolSetBuilder {
        ToolSetBuilder::new()
            .with_access(Arc::new(MockAccessController::new()))
            .with_doc_reader(Arc::new(MockDocReader::new()))
            .with_web(Arc::new(MockWebSearchClient::new()))
            .with_prompts(Arc::new(InMemoryPromptCatalog::with_builtin()))
            .with_router(Arc::new(MockTextModelRouter::new()))
    }

    #[test]
    fn test_build_expands_kinds() {
        let set = wired().build(
            &[ToolKind::DocRead, ToolKind::WebSearch, ToolKind::DocEdit],
            &ToolCallContext::default(),
            &no_override,
        );

        assert_eq!(
            set.names(),
            vec!["doc_edit", "doc_read", "web_crawl_exa", "web_search_exa"]
        );
    }

    #[test]
    fn test_build_skips_unwired_tools() {
        let set = ToolSetBuilder::new()
            .with_web(Arc::new(MockWebSearchClient::new()))
            .build(
                &[ToolKind::DocKeywordSearch, ToolKind::DocSemanticSearch, ToolKind::CodeArtifact],
                &ToolCallContext::default(),
                &no_override,
            );

        assert!(set.is_empty());
    }

    #[test]
    fn test_override_wins_over_builtin() {
        let override_fn = |kind: ToolKind| match kind {
            ToolKind::WebSearch => Some(ToolOverride::Native {
                name: "web_search".to_string(),
                declaration: json!({"type": "web_search_20250305", "name": "web_search"}),
            }),
            ToolKind::DocEdit => Some(ToolOverride::Skip),
            _ => None,
        };

        let set = wired().build(
            &[ToolKind::WebSearch, ToolKind::DocEdit, ToolKind::CodeArtifact],
            &ToolCallContext::default(),
            &override_fn,
        );

        assert_eq!(set.names(), vec!["code_artifact", "web_search"]);
        assert!(set.is_native("web_search"));
        assert!(!set.contains("doc_edit"));
        assert!(!set.contains("web_search_exa"));
    }

    #[test]
    fn test_override_applies_without_services() {
        let override_fn = |_: ToolKind| {
            Some(ToolOverride::Native {
                name: "web_search".to_string(),
                declaration: json!({"type": "web_search_20250305"}),
            })
        };

        let set = ToolSetBuilder::new().build(
            &[ToolKind::WebSearch],
            &ToolCallContext::default(),
            &override_fn,
        );

        assert_eq!(set.names(), vec!["web_search"]);
    }
}
