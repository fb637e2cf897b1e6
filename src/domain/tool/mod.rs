//! Tools the model can call back into

mod collaborators;
mod kind;
mod set;
mod tool;

pub use collaborators::{
    AccessController, ChunkMatch, DocContent, DocKeywordIndex, DocReader, DocSemanticIndex,
    SearchDoc, TextModelRouter, WebPage, WebSearchClient,
};
pub use kind::ToolKind;
pub use set::ToolSet;
pub use tool::{
    args_object, optional_string, required_string, CopilotTool, ToolCall, ToolCallContext,
    ToolError, ToolOverride,
};

#[cfg(test)]
pub use collaborators::{
    MockAccessController, MockDocKeywordIndex, MockDocReader, MockDocSemanticIndex,
    MockTextModelRouter, MockWebSearchClient,
};
