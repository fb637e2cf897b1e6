use super::{StreamChunk, StreamObject};
use crate::domain::DomainError;

/// Passes structured events through and merges persisted event lists
#[derive(Debug, Default)]
pub struct StreamObjectParser;

impl StreamObjectParser {
    pub fn new() -> Self {
        Self
    }

    /// Structured form of a live chunk; `None` for events without one.
    pub fn parse(&self, chunk: &StreamChunk) -> Result<Option<StreamObject>, DomainError> {
        let object = match chunk {
            StreamChunk::TextDelta { text_delta } => StreamObject::TextDelta {
                text_delta: text_delta.clone(),
            },
            StreamChunk::Reasoning { text_delta } => StreamObject::Reasoning {
                text_delta: text_delta.clone(),
            },
            StreamChunk::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => StreamObject::ToolCall {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                args: args.clone(),
            },
            StreamChunk::ToolResult {
                tool_call_id,
                tool_name,
                args,
                result,
            } => StreamObject::ToolResult {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                args: args.clone(),
                result: result.clone(),
            },
            StreamChunk::Error { error } => return Err(DomainError::stream(error.clone())),
            StreamChunk::Finish { .. } => return Ok(None),
        };
        Ok(Some(object))
    }

    /// Collapse consecutive same-type deltas and fold each tool result into
    /// the tool call it answers.
    pub fn merge_text_delta(objects: Vec<StreamObject>) -> Vec<StreamObject> {
        let mut merged: Vec<StreamObject> = Vec::with_capacity(objects.len());

        for object in objects {
            match object {
                StreamObject::TextDelta { text_delta } => match merged.last_mut() {
                    Some(StreamObject::TextDelta { text_delta: prev }) => prev.push_str(&text_delta),
                    _ => merged.push(StreamObject::TextDelta { text_delta }),
                },
                StreamObject::Reasoning { text_delta } => match merged.last_mut() {
                    Some(StreamObject::Reasoning { text_delta: prev }) => prev.push_str(&text_delta),
                    _ => merged.push(StreamObject::Reasoning { text_delta }),
                },
                result @ StreamObject::ToolResult { .. } => {
                    let key = result.tool_key();
                    let call = merged.iter().position(|item| {
                        matches!(item, StreamObject::ToolCall { .. }) && item.tool_key() == key
                    });
                    match call {
                        Some(index) => merged[index] = result,
                        None => merged.push(result),
                    }
                }
                call @ StreamObject::ToolCall { .. } => merged.push(call),
            }
        }

        merged
    }

    /// Plain text carried by the text deltas
    pub fn merge_content(objects: &[StreamObject]) -> String {
        objects
            .iter()
            .filter_map(|o| match o {
                StreamObject::TextDelta { text_delta } => Some(text_delta.as_str()),
                _ => None,
            })
            .collect()
    }
}
