use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use super::http_client::HttpClientTrait;
use super::normalizer::{NormalizeOptions, RequestNormalizer};
use super::openai_compat::{parse_arguments, vendor_error};
use super::pipeline::{into_object_stream, into_text_stream, prepare_model};
use super::sse::sse_messages;
use super::tool_loop::{run_tool_loop, ChatBackend, ChunkStream};
use crate::domain::llm::{
    ChatMessage, ChatOptions, ChatRequest, ContentPart, CopilotProvider, FinishReason,
    InputModality, MediaSource, MessageRole, ModelCapability, ModelSelectionQuery, ObjectStream,
    OutputModality, ProviderModel, ProviderType, TextStream, ToolDeclaration, Usage,
};
use crate::domain::prompt::PromptMessage;
use crate::domain::stream::StreamChunk;
use crate::domain::tool::{ToolCallContext, ToolKind, ToolOverride, ToolSet};
use crate::domain::DomainError;
use crate::infrastructure::metrics::{CallMetrics, Operation};
use crate::infrastructure::tools::ToolSetBuilder;

const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const THINKING_BUDGET_TOKENS: u32 = 12000;
const WEB_SEARCH_TOOL: &str = "web_search";
const WEB_SEARCH_MAX_USES: u32 = 5;

fn default_models() -> Vec<ProviderModel> {
    let capability = || {
        ModelCapability::new(
            &[InputModality::Text, InputModality::Image],
            &[OutputModality::Text, OutputModality::Object],
        )
    };

    vec![
        ProviderModel::new("claude-opus-4-20250514", vec![capability()]),
        ProviderModel::new("claude-sonnet-4-20250514", vec![capability()]),
        ProviderModel::new("claude-3-7-sonnet-20250219", vec![capability()]),
        ProviderModel::new("claude-3-5-sonnet-20241022", vec![capability().as_default()]),
    ]
}

/// Extended thinking is available on sonnet models after 3.5
fn supports_thinking(model: &str) -> bool {
    model.contains("sonnet") && !model.starts_with("claude-3-5-sonnet")
}

/// Anthropic API provider
#[derive(Debug)]
pub struct AnthropicProvider<C: HttpClientTrait + 'static> {
    client: Arc<C>,
    api_key: String,
    base_url: String,
    models: Vec<ProviderModel>,
    normalizer: RequestNormalizer,
    tools: Option<Arc<ToolSetBuilder>>,
}

impl<C: HttpClientTrait + 'static> AnthropicProvider<C> {
    pub fn new(client: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_ANTHROPIC_BASE_URL)
    }

    pub fn with_base_url(
        client: Arc<C>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let normalizer = RequestNormalizer::new(client.clone());

        Self {
            client,
            api_key: api_key.into(),
            base_url,
            models: default_models(),
            normalizer,
            tools: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolSetBuilder>) -> Self {
        self.tools = Some(tools);
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn tool_override(kind: ToolKind) -> Option<ToolOverride> {
        match kind {
            ToolKind::WebSearch => Some(ToolOverride::Native {
                name: WEB_SEARCH_TOOL.to_string(),
                declaration: json!({
                    "type": "web_search_20250305",
                    "name": WEB_SEARCH_TOOL,
                    "max_uses": WEB_SEARCH_MAX_USES,
                }),
            }),
            _ => None,
        }
    }

    async fn full_stream(
        &self,
        model: &ProviderModel,
        messages: Vec<PromptMessage>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, DomainError> {
        let prompt = self
            .normalizer
            .normalize(
                messages.clone(),
                NormalizeOptions {
                    with_attachment: true,
                    use_base64: true,
                },
            )
            .await?;

        let ctx = ToolCallContext::from_options(options).with_messages(messages);
        let tools = match &self.tools {
            Some(builder) if !options.tools.is_empty() => {
                builder.build(&options.tools, &ctx, &Self::tool_override)
            }
            _ => ToolSet::new(),
        };

        let mut request = ChatRequest::builder()
            .system(prompt.system)
            .messages(prompt.messages)
            .tools(tools.declarations())
            .max_tokens(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
            .reasoning(options.reasoning && supports_thinking(&model.id))
            .build();
        request.temperature = options.temperature;

        let backend = Arc::new(MessagesBackend {
            http: self.client.clone(),
            url: self.messages_url(),
            api_key: self.api_key.clone(),
            model: model.id.clone(),
        });

        Ok(run_tool_loop(backend, request, tools, ctx))
    }

    /// Final text, preceded by the model's reasoning when it produced any
    async fn reasoned_text(
        &self,
        model: &ProviderModel,
        messages: Vec<PromptMessage>,
        options: &ChatOptions,
    ) -> Result<String, DomainError> {
        let mut stream = self.full_stream(model, messages, options).await?;

        let mut reasoning = String::new();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(StreamChunk::TextDelta { text_delta }) => text.push_str(&text_delta),
                Ok(StreamChunk::Reasoning { text_delta }) => reasoning.push_str(&text_delta),
                Ok(StreamChunk::Error { error }) => return Err(DomainError::stream(error)),
                Ok(_) => {}
                Err(e) => {
                    error!(model = %model.id, error = %e, "Anthropic text generation failed");
                    return Err(e);
                }
            }
        }

        if text.is_empty() {
            return Err(DomainError::provider_side(
                ProviderType::Anthropic.as_str(),
                "unexpected_response",
                "Failed to generate text",
            ));
        }
        if reasoning.is_empty() {
            Ok(text)
        } else {
            Ok(format!("{}\n{}", reasoning, text))
        }
    }
}

#[async_trait]
impl<C: HttpClientTrait + 'static> CopilotProvider for AnthropicProvider<C> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn models(&self) -> &[ProviderModel] {
        &self.models
    }

    fn configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn text(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<String, DomainError> {
        let model = prepare_model(self, query, OutputModality::Text, &messages, &options)?;
        let call = CallMetrics::start(Operation::ChatText, ProviderType::Anthropic, &model.id);
        call.observe(self.reasoned_text(&model, messages, &options).await)
    }

    async fn stream_text(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<TextStream, DomainError> {
        let model = prepare_model(self, query, OutputModality::Text, &messages, &options)?;
        let call = CallMetrics::start(Operation::ChatTextStream, ProviderType::Anthropic, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;
        Ok(call.observe_stream(into_text_stream(stream)))
    }

    async fn stream_object(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<ObjectStream, DomainError> {
        let model = prepare_model(self, query, OutputModality::Object, &messages, &options)?;
        let call =
            CallMetrics::start(Operation::ChatObjectStream, ProviderType::Anthropic, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;
        Ok(call.observe_stream(into_object_stream(stream)))
    }
}

/// One Messages API call
#[derive(Debug)]
struct MessagesBackend {
    http: Arc<dyn HttpClientTrait>,
    url: String,
    api_key: String,
    model: String,
}

impl MessagesBackend {
    fn headers(&self) -> Vec<(&str, &str)> {
        vec![
            ("x-api-key", self.api_key.as_str()),
            ("anthropic-version", ANTHROPIC_VERSION),
            ("Content-Type", "application/json"),
        ]
    }
}

#[async_trait]
impl ChatBackend for MessagesBackend {
    async fn step(&self, request: &ChatRequest) -> Result<ChunkStream, DomainError> {
        let body = build_request(&self.model, request);
        let bytes = self
            .http
            .post_json_stream(&self.url, self.headers(), &body)
            .await
            .map_err(|e| vendor_error(ProviderType::Anthropic, e))?;

        let mut messages = sse_messages(bytes);
        Ok(Box::pin(stream! {
            let mut decoder = EventDecoder::default();
            while let Some(message) = messages.next().await {
                let decoded = message
                    .and_then(|m| m.json::<StreamEvent>())
                    .and_then(|event| decoder.decode(event));
                match decoded {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(vendor_error(ProviderType::Anthropic, e));
                        return;
                    }
                }
            }
            yield Ok(decoder.finish());
        }))
    }
}

fn build_request(model: &str, request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().filter_map(wire_message).collect();
    let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": true,
    });

    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }

    // Thinking blocks are not replayed, so follow-up tool steps run without thinking
    let follows_tool = request
        .messages
        .last()
        .is_some_and(|m| m.role == MessageRole::Tool);
    if request.reasoning && !follows_tool {
        body["thinking"] = json!({"type": "enabled", "budget_tokens": THINKING_BUDGET_TOKENS});
        body["max_tokens"] = json!(max_tokens + THINKING_BUDGET_TOKENS);
    } else if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| match tool {
                ToolDeclaration::Function {
                    name,
                    description,
                    parameters,
                } => json!({
                    "name": name,
                    "description": description,
                    "input_schema": parameters,
                }),
                ToolDeclaration::Native { declaration, .. } => declaration.clone(),
            })
            .collect();
    }

    body
}

fn wire_message(message: &ChatMessage) -> Option<Value> {
    let role = match message.role {
        MessageRole::Assistant => "assistant",
        MessageRole::User | MessageRole::Tool => "user",
    };

    let blocks: Vec<Value> = message.content.iter().filter_map(wire_block).collect();
    if blocks.is_empty() {
        return None;
    }
    Some(json!({"role": role, "content": blocks}))
}

fn wire_block(part: &ContentPart) -> Option<Value> {
    let block = match part {
        ContentPart::Text { text } if text.is_empty() => return None,
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::Image { source, mime_type } => json!({
            "type": "image",
            "source": wire_source(source, mime_type),
        }),
        ContentPart::File { source, mime_type } => json!({
            "type": "document",
            "source": wire_source(source, mime_type),
        }),
        ContentPart::ToolCall { id, name, args } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": args,
        }),
        ContentPart::ToolResult { id, result, .. } => json!({
            "type": "tool_result",
            "tool_use_id": id,
            "content": result.to_string(),
        }),
    };
    Some(block)
}

fn wire_source(source: &MediaSource, mime_type: &str) -> Value {
    match source {
        MediaSource::Base64(data) => json!({
            "type": "base64",
            "media_type": mime_type,
            "data": data,
        }),
        MediaSource::Url(url) => json!({"type": "url", "url": url}),
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<WireUsage>,
    },
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    usage: Option<WireUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    ServerToolUse {
        id: String,
        name: String,
    },
    WebSearchToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input: String,
}

/// Folds Messages API events into canonical chunks.
///
/// Tool input arrives as JSON fragments and is released on block stop.
/// Server tool calls are remembered so their results can echo the arguments.
#[derive(Debug, Default)]
struct EventDecoder {
    pending: HashMap<u32, PendingToolUse>,
    server_calls: HashMap<String, Value>,
    usage: Usage,
    finish: Option<FinishReason>,
}

impl EventDecoder {
    fn decode(&mut self, event: StreamEvent) -> Result<Vec<StreamChunk>, DomainError> {
        let mut out = Vec::new();

        match event {
            StreamEvent::MessageStart { message } => {
                let usage = message.usage.unwrap_or_default();
                self.usage.add(Usage::new(usage.input_tokens, usage.output_tokens));
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text } if !text.is_empty() => out.push(StreamChunk::text(text)),
                ContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                    out.push(StreamChunk::reasoning(thinking))
                }
                ContentBlock::ToolUse { id, name } | ContentBlock::ServerToolUse { id, name } => {
                    self.pending.insert(
                        index,
                        PendingToolUse {
                            id,
                            name,
                            input: String::new(),
                        },
                    );
                }
                ContentBlock::WebSearchToolResult {
                    tool_use_id,
                    content,
                } => {
                    let args = self.server_calls.remove(&tool_use_id).unwrap_or(Value::Null);
                    out.push(StreamChunk::tool_result(
                        tool_use_id,
                        WEB_SEARCH_TOOL,
                        args,
                        web_search_results(content),
                    ));
                }
                _ => {}
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => out.push(StreamChunk::text(text)),
                BlockDelta::ThinkingDelta { thinking } => out.push(StreamChunk::reasoning(thinking)),
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(pending) = self.pending.get_mut(&index) {
                        pending.input.push_str(&partial_json);
                    }
                }
                BlockDelta::Other => {}
            },
            StreamEvent::ContentBlockStop { index } => {
                if let Some(call) = self.pending.remove(&index) {
                    let args = parse_arguments(&call.input);
                    if call.name == WEB_SEARCH_TOOL {
                        self.server_calls.insert(call.id.clone(), args.clone());
                    }
                    out.push(StreamChunk::tool_call(call.id, call.name, args));
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.finish = Some(FinishReason::from_vendor(&reason));
                }
                if let Some(usage) = usage {
                    self.usage.add(Usage::new(0, usage.output_tokens));
                }
            }
            StreamEvent::Error { error } => {
                return Err(DomainError::provider_side(
                    ProviderType::Anthropic.as_str(),
                    error.kind,
                    error.message,
                ));
            }
            StreamEvent::Other => {}
        }

        Ok(out)
    }

    fn finish(&mut self) -> StreamChunk {
        StreamChunk::Finish {
            finish_reason: self.finish.take().unwrap_or(FinishReason::Stop),
            usage: Some(self.usage),
        }
    }
}

/// Keep the readable fields of each search hit
fn web_search_results(content: Value) -> Value {
    match content {
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                json!({
                    "title": item.get("title").cloned().unwrap_or(Value::Null),
                    "url": item.get("url").cloned().unwrap_or(Value::Null),
                    "pageAge": item.get("page_age").cloned().unwrap_or(Value::Null),
                })
            })
            .collect(),
        other => other,
    }
}
