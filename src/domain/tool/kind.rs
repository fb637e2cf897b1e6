use std::fmt;

use serde::{Deserialize, Serialize};

/// Host capability a caller may expose to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    ConversationSummary,
    DocEdit,
    DocRead,
    DocKeywordSearch,
    DocSemanticSearch,
    DocCompose,
    CodeArtifact,
    WebSearch,
}

impl ToolKind {
    /// Tool names a requested kind expands to, as seen by the model
    pub fn tool_names(&self) -> &'static [&'static str] {
        match self {
            Self::ConversationSummary => &["conversation_summary"],
            Self::DocEdit => &["doc_edit"],
            Self::DocRead => &["doc_read"],
            Self::DocKeywordSearch => &["doc_keyword_search"],
            Self::DocSemanticSearch => &["doc_semantic_search"],
            Self::DocCompose => &["doc_compose"],
            Self::CodeArtifact => &["code_artifact"],
            Self::WebSearch => &["web_search_exa", "web_crawl_exa"],
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConversationSummary => "conversationSummary",
            Self::DocEdit => "docEdit",
            Self::DocRead => "docRead",
            Self::DocKeywordSearch => "docKeywordSearch",
            Self::DocSemanticSearch => "docSemanticSearch",
            Self::DocCompose => "docCompose",
            Self::CodeArtifact => "codeArtifact",
            Self::WebSearch => "webSearch",
        };
        f.write_str(name)
    }
}
