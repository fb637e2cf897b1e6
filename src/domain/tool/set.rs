use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{CopilotTool, ToolCall, ToolCallContext, ToolError};
use crate::domain::llm::ToolDeclaration;

/// Name-to-implementation map handed to a provider for one chat turn.
///
/// Native entries are declared to the vendor but executed on its side, so
/// they never reach [`ToolSet::dispatch`].
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn CopilotTool>>,
    natives: Vec<ToolDeclaration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("natives", &self.natives)
            .finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tool: Arc<dyn CopilotTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn insert_native(&mut self, name: impl Into<String>, declaration: Value) {
        self.natives.push(ToolDeclaration::Native {
            name: name.into(),
            declaration,
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name) || self.natives.iter().any(|d| d.name() == name)
    }

    /// Whether the vendor executes this tool itself
    pub fn is_native(&self, name: &str) -> bool {
        self.natives.iter().any(|d| d.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools
            .keys()
            .map(String::as_str)
            .chain(self.natives.iter().map(ToolDeclaration::name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.natives.is_empty()
    }

    /// Declarations to send to the vendor, functions first
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .values()
            .map(|t| t.declaration())
            .chain(self.natives.iter().cloned())
            .collect()
    }

    /// Run a tool call. Failures come back as a serialized [`ToolError`].
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolCallContext) -> Value {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Model called an unknown tool");
            return ToolError::new("Tool Not Found", format!("Unknown tool: {}", call.name))
                .to_value();
        };

        debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");

        match tool.execute(call.args.clone(), ctx).await {
            Ok(value) => value,
            Err(error) => {
                warn!(tool = %call.name, call_id = %call.id, error = %error, "Tool call failed");
                error.to_value()
            }
        }
    }
}
