use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::llm::{FinishReason, Usage};

/// Canonical, vendor-independent unit of streamed output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamChunk {
    TextDelta {
        text_delta: String,
    },
    #[serde(alias = "reasoning-delta")]
    Reasoning {
        text_delta: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        args: Value,
        result: Value,
    },
    Error {
        error: String,
    },
    Finish {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            text_delta: delta.into(),
        }
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        Self::Reasoning {
            text_delta: delta.into(),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self::ToolCall {
            tool_call_id: id.into(),
            tool_name: name.into(),
            args,
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        args: Value,
        result: Value,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: id.into(),
            tool_name: name.into(),
            args,
            result,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    pub fn finish(finish_reason: FinishReason) -> Self {
        Self::Finish {
            finish_reason,
            usage: None,
        }
    }

    /// Wire name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::Error { .. } => "error",
            Self::Finish { .. } => "finish",
        }
    }
}

/// Structured stream event as persisted alongside a chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamObject {
    TextDelta {
        text_delta: String,
    },
    Reasoning {
        text_delta: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        args: Value,
        result: Value,
    },
}

impl StreamObject {
    /// `(toolCallId, toolName)` for tool events
    pub fn tool_key(&self) -> Option<(&str, &str)> {
        match self {
            Self::ToolCall {
                tool_call_id,
                tool_name,
                ..
            }
            | Self::ToolResult {
                tool_call_id,
                tool_name,
                ..
            } => Some((tool_call_id, tool_name)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_wire_shape() {
        let chunk = StreamChunk::tool_call("call_1", "doc_read", json!({"doc_id": "d1"}));
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({
                "type": "tool-call",
                "toolCallId": "call_1",
                "toolName": "doc_read",
                "args": {"doc_id": "d1"}
            })
        );
    }

    #[test]
    fn test_reasoning_delta_alias() {
        let chunk: StreamChunk =
            serde_json::from_value(json!({"type": "reasoning-delta", "textDelta": "hmm"})).unwrap();
        assert_eq!(chunk, StreamChunk::reasoning("hmm"));
        assert_eq!(chunk.kind(), "reasoning");
    }

    #[test]
    fn test_object_tool_key() {
        let object = StreamObject::ToolResult {
            tool_call_id: "c".into(),
            tool_name: "t".into(),
            args: json!({}),
            result: json!(null),
        };
        assert_eq!(object.tool_key(), Some(("c", "t")));
    }
}
