//! Chat Completions wire format shared by OpenAI-compatible vendors

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::http_client::HttpClientTrait;
use super::sse::sse_messages;
use super::tool_loop::{ChatBackend, ChunkStream};
use crate::domain::llm::{
    ChatMessage, ChatRequest, ContentPart, FinishReason, MediaSource, MessageRole, ProviderType,
    ToolDeclaration, Usage,
};
use crate::domain::stream::StreamChunk;
use crate::domain::DomainError;

/// Build a Chat Completions request body
pub fn chat_body(model: &str, request: &ChatRequest, stream: bool) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in &request.messages {
        messages.extend(wire_messages(message));
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });

    if stream {
        body["stream_options"] = json!({"include_usage": true});
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if !request.tools.is_empty() {
        body["tools"] = request.tools.iter().map(wire_tool).collect();
    }

    body
}

fn wire_tool(tool: &ToolDeclaration) -> Value {
    match tool {
        ToolDeclaration::Function {
            name,
            description,
            parameters,
        } => json!({
            "type": "function",
            "function": {
                "name": name,
                "description": description,
                "parameters": parameters,
            }
        }),
        ToolDeclaration::Native { declaration, .. } => declaration.clone(),
    }
}

fn wire_messages(message: &ChatMessage) -> Vec<Value> {
    match message.role {
        MessageRole::Tool => message
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult { id, result, .. } => Some(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": result.to_string(),
                })),
                _ => None,
            })
            .collect(),
        MessageRole::Assistant => {
            let text = message.text();
            let calls: Vec<Value> = message
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolCall { id, name, args } => Some(json!({
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": args.to_string()},
                    })),
                    _ => None,
                })
                .collect();

            let mut wire = json!({"role": "assistant", "content": text});
            if !calls.is_empty() {
                wire["tool_calls"] = Value::Array(calls);
            }
            vec![wire]
        }
        MessageRole::User => {
            let content = if message.has_media() {
                message.content.iter().filter_map(wire_user_part).collect()
            } else {
                Value::String(message.text())
            };
            vec![json!({"role": "user", "content": content})]
        }
    }
}

fn wire_user_part(part: &ContentPart) -> Option<Value> {
    match part {
        ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentPart::Image { source, mime_type } => Some(json!({
            "type": "image_url",
            "image_url": {"url": source.to_url(mime_type)},
        })),
        ContentPart::File { source, mime_type } => {
            let file_name = match source {
                MediaSource::Url(url) => url.rsplit('/').next().unwrap_or("file").to_string(),
                MediaSource::Base64(_) => "file".to_string(),
            };
            Some(json!({
                "type": "file",
                "file": {"filename": file_name, "file_data": source.to_url(mime_type)},
            }))
        }
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Usage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Google-style status code, e.g. `INVALID_ARGUMENT`
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    pub usage: Option<WireUsage>,
    pub error: Option<WireError>,
    /// Perplexity attaches its sources here
    pub citations: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<DeltaToolCall>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaToolCall {
    pub index: u32,
    pub id: Option<String>,
    pub function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Arguments as sent by the model; unparseable text is kept as a string
pub fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

/// Reassembles streamed deltas into canonical chunks.
///
/// Tool call fragments are buffered by index and released as whole
/// `tool-call` chunks when the stream ends.
#[derive(Debug, Default)]
pub struct CompletionDecoder {
    calls: BTreeMap<u32, PartialCall>,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
}

impl CompletionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(
        &mut self,
        provider: ProviderType,
        chunk: CompletionChunk,
    ) -> Result<Vec<StreamChunk>, DomainError> {
        if let Some(error) = chunk.error {
            return Err(DomainError::provider_side(
                provider.as_str(),
                error.kind.unwrap_or_else(|| "stream_error".to_string()),
                error.message,
            ));
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        let mut out = Vec::new();
        for choice in chunk.choices {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                out.push(StreamChunk::reasoning(reasoning));
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                out.push(StreamChunk::text(content));
            }
            for call in delta.tool_calls {
                let partial = self.calls.entry(call.index).or_default();
                if let Some(id) = call.id {
                    partial.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish = Some(FinishReason::from_vendor(&reason));
            }
        }

        Ok(out)
    }

    /// Buffered tool calls followed by the finish chunk
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out: Vec<StreamChunk> = std::mem::take(&mut self.calls)
            .into_values()
            .map(|c| {
                // Some compatible vendors omit ids; results still need a key to pair with
                let id = if c.id.is_empty() {
                    format!("call_{}", Uuid::new_v4().simple())
                } else {
                    c.id
                };
                StreamChunk::tool_call(id, c.name, parse_arguments(&c.arguments))
            })
            .collect();

        out.push(StreamChunk::Finish {
            finish_reason: self.finish.take().unwrap_or(FinishReason::Stop),
            usage: self.usage.take(),
        });
        out
    }
}

/// Map a transport failure onto a provider error, using the vendor's own
/// error type when the body carries one
pub fn vendor_error(provider: ProviderType, error: DomainError) -> DomainError {
    if let DomainError::Http { message, .. } = &error {
        if let Some((kind, text)) = parse_error_body(message) {
            return DomainError::provider_side(provider.as_str(), kind, text);
        }
    }
    error.for_provider(provider.as_str())
}

/// Race a one-shot vendor call against the caller's signal
pub async fn abortable<T>(
    signal: &CancellationToken,
    request: impl Future<Output = Result<T, DomainError>>,
) -> Result<T, DomainError> {
    tokio::select! {
        biased;
        _ = signal.cancelled() => {
            debug!("Request cancelled before completion");
            Err(DomainError::Aborted)
        }
        result = request => result,
    }
}

/// `{error:{message,type|status}}` or `{detail:[{msg}]}` error payloads
pub fn parse_error_body(body: &str) -> Option<(String, String)> {
    #[derive(Deserialize)]
    struct Detail {
        msg: String,
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    #[derive(Deserialize)]
    struct Body {
        error: Option<WireError>,
        detail: Option<Vec<Detail>>,
    }

    let body: Body = serde_json::from_str(body).ok()?;

    if let Some(error) = body.error {
        let kind = error
            .kind
            .or_else(|| error.status.map(|s| s.to_ascii_lowercase()))
            .unwrap_or_else(|| "api_error".to_string());
        return Some((kind, error.message));
    }

    let detail = body.detail?;
    let first = detail.first()?;
    let message = detail
        .iter()
        .map(|d| d.msg.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    Some((
        first.kind.clone().unwrap_or_else(|| "invalid_request".to_string()),
        message,
    ))
}

/// Streams one Chat Completions call as canonical chunks
#[derive(Debug, Clone)]
pub struct CompletionBackend {
    pub provider: ProviderType,
    pub http: Arc<dyn HttpClientTrait>,
    pub url: String,
    pub auth_header: String,
    pub model: String,
    /// Vendor-specific top-level body fields
    pub extra: Map<String, Value>,
}

#[async_trait]
impl ChatBackend for CompletionBackend {
    async fn step(&self, request: &ChatRequest) -> Result<ChunkStream, DomainError> {
        let mut body = chat_body(&self.model, request, true);
        for (key, value) in &self.extra {
            body[key.as_str()] = value.clone();
        }
        let headers = vec![
            ("Authorization", self.auth_header.as_str()),
            ("Content-Type", "application/json"),
        ];
        let provider = self.provider;

        let bytes = self
            .http
            .post_json_stream(&self.url, headers, &body)
            .await
            .map_err(|e| vendor_error(provider, e))?;

        let mut messages = sse_messages(bytes);
        Ok(Box::pin(stream! {
            let mut decoder = CompletionDecoder::new();
            while let Some(message) = messages.next().await {
                let decoded = message
                    .and_then(|m| m.json::<CompletionChunk>())
                    .and_then(|chunk| decoder.decode(provider, chunk));
                match decoded {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(vendor_error(provider, e));
                        return;
                    }
                }
            }
            for chunk in decoder.finish() {
                yield Ok(chunk);
            }
        }))
    }
}

/// Non-streaming response
#[derive(Debug, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
    pub logprobs: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    pub content: Option<String>,
}

impl Completion {
    pub fn parse(provider: ProviderType, json: Value) -> Result<Self, DomainError> {
        serde_json::from_value(json).map_err(|e| {
            DomainError::provider_side(
                provider.as_str(),
                "unexpected_response",
                format!("Failed to parse response: {}", e),
            )
        })
    }

    pub fn into_first_choice(self, provider: ProviderType) -> Result<CompletionChoice, DomainError> {
        self.choices.into_iter().next().ok_or_else(|| {
            DomainError::provider_side(provider.as_str(), "unexpected_response", "No choices in response")
        })
    }
}
