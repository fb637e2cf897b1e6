use async_stream::stream;
use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use super::http_client::HttpClientTrait;
use super::normalizer::{NormalizeOptions, RequestNormalizer};
use super::openai_compat::{abortable, vendor_error};
use super::pipeline::{collect_text, into_object_stream, into_text_stream, prepare_model};
use super::sse::sse_messages;
use super::structured::parse_structured;
use super::tool_loop::{run_tool_loop, ChatBackend, ChunkStream};
use crate::domain::llm::{
    ChatMessage, ChatOptions, ChatRequest, ContentPart, CopilotProvider, EmbeddingOptions,
    FinishReason, InputModality, MediaSource, MessageRole, ModelCapability, ModelSelectionQuery,
    ObjectStream, OutputModality, ProviderModel, ProviderType, TextStream, ToolDeclaration, Usage,
};
use crate::domain::prompt::{check_embedding_input, PromptMessage};
use crate::domain::stream::StreamChunk;
use crate::domain::tool::{ToolCallContext, ToolSet};
use crate::domain::DomainError;
use crate::infrastructure::metrics::{CallMetrics, Operation};
use crate::infrastructure::tools::ToolSetBuilder;

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_VERSION: &str = "v1beta";
const THINKING_BUDGET_TOKENS: i32 = 12000;
/// Let the model size its own thinking for structured replies
const DYNAMIC_THINKING_BUDGET: i32 = -1;
const DEFAULT_MAX_RETRIES: u32 = 3;
const EMBEDDING_MAX_RETRIES: u32 = 3;
const EMBEDDING_TASK_TYPE: &str = "RETRIEVAL_DOCUMENT";

/// JSON Schema keywords the Gemini schema subset rejects
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties"];

fn default_models() -> Vec<ProviderModel> {
    let chat = || {
        ModelCapability::new(
            &[InputModality::Text, InputModality::Image, InputModality::Audio],
            &[OutputModality::Text, OutputModality::Object, OutputModality::Structured],
        )
    };

    vec![
        ProviderModel::new("gemini-2.0-flash-001", vec![chat().as_default()]),
        ProviderModel::new("gemini-2.5-flash", vec![chat()]),
        ProviderModel::new("gemini-2.5-pro", vec![chat()]),
        ProviderModel::new(
            "text-embedding-005",
            vec![
                ModelCapability::new(&[InputModality::Text], &[OutputModality::Embedding])
                    .as_default(),
            ],
        ),
    ]
}

fn supports_thinking(model: &str) -> bool {
    model.starts_with("gemini-2.5")
}

fn headers(api_key: &str) -> Vec<(&str, &str)> {
    vec![("x-goog-api-key", api_key), ("Content-Type", "application/json")]
}

/// Google Gemini over the Generative Language API
#[derive(Debug)]
pub struct GeminiProvider<C: HttpClientTrait + 'static> {
    client: Arc<C>,
    api_key: String,
    base_url: String,
    models: Vec<ProviderModel>,
    normalizer: RequestNormalizer,
    tools: Option<Arc<ToolSetBuilder>>,
}

impl<C: HttpClientTrait + 'static> GeminiProvider<C> {
    pub fn new(client: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_GEMINI_BASE_URL)
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

    /// `{base}/v1beta/models/{model}:{method}`
    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/{}/models/{}:{}", self.base_url, API_VERSION, model, method)
    }

    /// Normalized request plus the structured-output schema, if any
    async fn prompt(
        &self,
        messages: Vec<PromptMessage>,
    ) -> Result<(ChatRequest, Option<Value>), DomainError> {
        let prompt = self
            .normalizer
            .normalize(
                messages,
                NormalizeOptions {
                    with_attachment: true,
                    use_base64: true,
                },
            )
            .await?;

        let request = ChatRequest::builder()
            .system(prompt.system)
            .messages(prompt.messages)
            .build();
        Ok((request, prompt.schema))
    }

    async fn full_stream(
        &self,
        model: &ProviderModel,
        messages: Vec<PromptMessage>,
        options: &ChatOptions,
    ) -> Result<ChunkStream, DomainError> {
        let ctx = ToolCallContext::from_options(options).with_messages(messages.clone());
        let tools = match &self.tools {
            Some(builder) if !options.tools.is_empty() => {
                builder.build(&options.tools, &ctx, &|_| None)
            }
            _ => ToolSet::new(),
        };

        let (mut request, _) = self.prompt(messages).await?;
        request.tools = tools.declarations();
        request.temperature = options.temperature;
        request.max_tokens = options.max_tokens;
        request.reasoning = options.reasoning && supports_thinking(&model.id);

        let backend = Arc::new(GenerateBackend {
            http: self.client.clone(),
            url: format!("{}?alt=sse", self.model_url(&model.id, "streamGenerateContent")),
            api_key: self.api_key.clone(),
        });

        Ok(run_tool_loop(backend, request, tools, ctx))
    }

    async fn post(
        &self,
        url: &str,
        body: &Value,
        signal: &CancellationToken,
    ) -> Result<Value, DomainError> {
        let request = async {
            self.client
                .post_json(url, headers(&self.api_key), body)
                .await
                .map_err(|e| vendor_error(ProviderType::Gemini, e))
        };
        abortable(signal, request).await
    }

    async fn structured_reply(
        &self,
        model: &ProviderModel,
        messages: Vec<PromptMessage>,
        options: &ChatOptions,
    ) -> Result<String, DomainError> {
        let (mut request, schema) = self.prompt(messages).await?;
        let schema = schema.ok_or_else(|| DomainError::prompt_invalid("Schema is required"))?;
        request.temperature = options.temperature;
        request.max_tokens = options.max_tokens;

        let mut body = build_request(&request);
        body["generationConfig"]["responseMimeType"] = json!("application/json");
        body["generationConfig"]["responseSchema"] = gemini_schema(&schema);
        if supports_thinking(&model.id) {
            body["generationConfig"]["thinkingConfig"] = json!({
                "thinkingBudget": DYNAMIC_THINKING_BUDGET,
                "includeThoughts": false,
            });
        }

        let url = self.model_url(&model.id, "generateContent");
        let attempts = options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES) + 1;
        for attempt in 1..=attempts {
            let response = self.post(&url, &body, &options.signal).await?;
            let content = reply_text(response)?;

            if let Some(value) = parse_structured(&content) {
                return Ok(value.to_string());
            }
            warn!(model = %model.id, attempt, "Structured reply is not valid JSON, regenerating");
        }

        Err(DomainError::provider_side(
            ProviderType::Gemini.as_str(),
            "unexpected_response",
            format!("No valid JSON after {} attempts", attempts),
        ))
    }

    async fn embed_one(
        &self,
        url: &str,
        input: &str,
        dimensions: u32,
        signal: &CancellationToken,
    ) -> Result<Vec<f32>, DomainError> {
        let body = json!({
            "content": {"parts": [{"text": input}]},
            "taskType": EMBEDDING_TASK_TYPE,
            "outputDimensionality": dimensions,
        });

        let mut attempt = 0;
        loop {
            match self.post(url, &body, signal).await {
                Ok(response) => {
                    let response: EmbedResponse =
                        serde_json::from_value(response).map_err(|e| {
                            DomainError::provider_side(
                                ProviderType::Gemini.as_str(),
                                "unexpected_response",
                                format!("Failed to parse response: {}", e),
                            )
                        })?;
                    return Ok(response.embedding.values);
                }
                Err(e) if e.is_aborted() || attempt >= EMBEDDING_MAX_RETRIES => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Gemini embedding failed, retrying");
                }
            }
        }
    }
}

#[async_trait]
impl<C: HttpClientTrait + 'static> CopilotProvider for GeminiProvider<C> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Gemini
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
        let call = CallMetrics::start(Operation::ChatText, ProviderType::Gemini, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;

        let text = call.observe(collect_text(stream).await).inspect_err(|e| {
            error!(model = %model.id, error = %e, "Gemini text generation failed");
        })?;
        let text = text.trim();
        if text.is_empty() {
            return call.observe(Err(DomainError::provider_side(
                ProviderType::Gemini.as_str(),
                "unexpected_response",
                "Failed to generate text",
            )));
        }
        Ok(text.to_string())
    }

    async fn stream_text(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<TextStream, DomainError> {
        let model = prepare_model(self, query, OutputModality::Text, &messages, &options)?;
        let call = CallMetrics::start(Operation::ChatTextStream, ProviderType::Gemini, &model.id);
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
        let call = CallMetrics::start(Operation::ChatObjectStream, ProviderType::Gemini, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;
        Ok(call.observe_stream(into_object_stream(stream)))
    }

    async fn structure(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<String, DomainError> {
        let model = prepare_model(self, query, OutputModality::Structured, &messages, &options)?;
        let call = CallMetrics::start(Operation::ChatText, ProviderType::Gemini, &model.id);
        call.observe(self.structured_reply(&model, messages, &options).await)
    }

    /// One request per input; inputs that still fail after retries are dropped
    async fn embedding(
        &self,
        query: &ModelSelectionQuery,
        inputs: Vec<String>,
        options: EmbeddingOptions,
    ) -> Result<Vec<Vec<f32>>, DomainError> {
        check_embedding_input(&inputs)?;
        let query = query.clone().with_output(OutputModality::Embedding);
        let model = self.select_model(&query)?;
        let call = CallMetrics::start(Operation::GenerateEmbedding, ProviderType::Gemini, &model.id);

        let url = self.model_url(&model.id, "embedContent");
        let dimensions = options.dimensions();
        let results = join_all(
            inputs
                .iter()
                .map(|input| self.embed_one(&url, input, dimensions, &options.signal)),
        )
        .await;

        if options.signal.is_cancelled() {
            return call.observe(Err(DomainError::Aborted));
        }

        Ok(results
            .into_iter()
            .filter_map(|result| {
                result
                    .inspect_err(|e| warn!(model = %model.id, error = %e, "Dropping failed embedding"))
                    .ok()
            })
            .filter(|e| !e.is_empty())
            .collect())
    }
}

/// One `streamGenerateContent` call
#[derive(Debug)]
struct GenerateBackend {
    http: Arc<dyn HttpClientTrait>,
    url: String,
    api_key: String,
}

#[async_trait]
impl ChatBackend for GenerateBackend {
    async fn step(&self, request: &ChatRequest) -> Result<ChunkStream, DomainError> {
        let body = build_request(request);
        let bytes = self
            .http
            .post_json_stream(&self.url, headers(&self.api_key), &body)
            .await
            .map_err(|e| vendor_error(ProviderType::Gemini, e))?;

        let mut messages = sse_messages(bytes);
        Ok(Box::pin(stream! {
            let mut decoder = ChunkDecoder::default();
            while let Some(message) = messages.next().await {
                let decoded = message
                    .and_then(|m| m.json::<GenerateResponse>())
                    .and_then(|response| decoder.decode(response));
                match decoded {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(vendor_error(ProviderType::Gemini, e));
                        return;
                    }
                }
            }
            yield Ok(decoder.finish());
        }))
    }
}

fn build_request(request: &ChatRequest) -> Value {
    let contents: Vec<Value> = request.messages.iter().filter_map(wire_content).collect();
    let mut body = json!({"contents": contents});

    if let Some(system) = &request.system {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }

    let mut config = Map::new();
    if let Some(temperature) = request.temperature {
        config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if request.reasoning {
        config.insert(
            "thinkingConfig".to_string(),
            json!({"thinkingBudget": THINKING_BUDGET_TOKENS, "includeThoughts": true}),
        );
    }
    if !config.is_empty() {
        body["generationConfig"] = Value::Object(config);
    }

    let mut functions = Vec::new();
    let mut tools = Vec::new();
    for tool in &request.tools {
        match tool {
            ToolDeclaration::Function {
                name,
                description,
                parameters,
            } => functions.push(json!({
                "name": name,
                "description": description,
                "parameters": gemini_schema(parameters),
            })),
            ToolDeclaration::Native { declaration, .. } => tools.push(declaration.clone()),
        }
    }
    if !functions.is_empty() {
        tools.insert(0, json!({"functionDeclarations": functions}));
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools);
    }

    body
}

fn wire_content(message: &ChatMessage) -> Option<Value> {
    let role = match message.role {
        MessageRole::Assistant => "model",
        MessageRole::User | MessageRole::Tool => "user",
    };

    let parts: Vec<Value> = message.content.iter().filter_map(wire_part).collect();
    if parts.is_empty() {
        return None;
    }
    Some(json!({"role": role, "parts": parts}))
}

fn wire_part(part: &ContentPart) -> Option<Value> {
    let part = match part {
        ContentPart::Text { text } if text.is_empty() => return None,
        ContentPart::Text { text } => json!({"text": text}),
        ContentPart::Image { source, mime_type } | ContentPart::File { source, mime_type } => {
            match source {
                MediaSource::Base64(data) => json!({
                    "inlineData": {"mimeType": mime_type, "data": data},
                }),
                MediaSource::Url(url) => json!({
                    "fileData": {"mimeType": mime_type, "fileUri": url},
                }),
            }
        }
        ContentPart::ToolCall { name, args, .. } => json!({
            "functionCall": {"name": name, "args": args},
        }),
        ContentPart::ToolResult { name, result, .. } => {
            // the response field must be an object
            let response = match result {
                Value::Object(_) => result.clone(),
                other => json!({"result": other}),
            };
            json!({"functionResponse": {"name": name, "response": response}})
        }
    };
    Some(part)
}

/// Drop schema keywords outside the subset Gemini accepts
fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), gemini_schema(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

/// Answer text of a non-streaming reply, thoughts excluded
fn reply_text(response: Value) -> Result<String, DomainError> {
    let response: GenerateResponse = serde_json::from_value(response).map_err(|e| {
        DomainError::provider_side(
            ProviderType::Gemini.as_str(),
            "unexpected_response",
            format!("Failed to parse response: {}", e),
        )
    })?;
    if let Some(error) = response.error {
        return Err(error.into_domain());
    }

    Ok(response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    thoughts_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

impl ApiError {
    fn into_domain(self) -> DomainError {
        DomainError::provider_side(
            ProviderType::Gemini.as_str(),
            self.status
                .map(|s| s.to_ascii_lowercase())
                .unwrap_or_else(|| "api_error".to_string()),
            self.message,
        )
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    #[serde(default)]
    values: Vec<f32>,
}

/// Folds streamed candidates into canonical chunks.
///
/// Usage metadata is cumulative, so the latest report wins.
#[derive(Debug, Default)]
struct ChunkDecoder {
    usage: Option<Usage>,
    finish: Option<FinishReason>,
}

impl ChunkDecoder {
    fn decode(&mut self, response: GenerateResponse) -> Result<Vec<StreamChunk>, DomainError> {
        if let Some(error) = response.error {
            return Err(error.into_domain());
        }
        if let Some(usage) = response.usage_metadata {
            self.usage = Some(Usage::new(
                usage.prompt_token_count,
                usage.candidates_token_count + usage.thoughts_token_count,
            ));
        }

        let mut out = Vec::new();
        let Some(candidate) = response.candidates.into_iter().next() else {
            return Ok(out);
        };

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            match part {
                Part {
                    function_call: Some(call),
                    ..
                } => {
                    let id = call
                        .id
                        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                    out.push(StreamChunk::tool_call(id, call.name, call.args));
                }
                Part {
                    text: Some(text), ..
                } if text.is_empty() => {}
                Part {
                    text: Some(text),
                    thought: true,
                    ..
                } => out.push(StreamChunk::reasoning(text)),
                Part {
                    text: Some(text), ..
                } => out.push(StreamChunk::text(text)),
                _ => {}
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finish = Some(FinishReason::from_vendor(&reason.to_ascii_lowercase()));
        }
        Ok(out)
    }

    fn finish(&mut self) -> StreamChunk {
        StreamChunk::Finish {
            finish_reason: self.finish.take().unwrap_or(FinishReason::Stop),
            usage: self.usage.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stream::StreamObject;
    use crate::infrastructure::llm::http_client::mock::MockHttpClient;
    use crate::infrastructure::llm::HttpClient;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STREAM_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-001:streamGenerateContent?alt=sse";
    const GENERATE_URL: &str =
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-001:generateContent";

    fn provider(http: &Arc<MockHttpClient>) -> GeminiProvider<MockHttpClient> {
        GeminiProvider::new(http.clone(), "g-key")
    }

    fn text_event(text: &str) -> Value {
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
    }

    #[tokio::test]
    async fn test_gemini_text() {
        let http = Arc::new(MockHttpClient::new().with_sse_events(
            STREAM_URL,
            &[
                text_event(" Bonjour"),
                json!({
                    "candidates": [{"content": {"parts": [{"text": " le monde "}]}, "finishReason": "STOP"}],
                    "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3},
                }),
            ],
        ));

        let text = provider(&http)
            .text(
                &ModelSelectionQuery::default(),
                vec![PromptMessage::system("speak french"), PromptMessage::user("hello")],
                ChatOptions::new().with_reasoning(true),
            )
            .await
            .unwrap();

        assert_eq!(text, "Bonjour le monde");
        let body = http.last_body().unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "speak french");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert!(body.get("generationConfig").is_none());
    }

    #[tokio::test]
    async fn test_gemini_thoughts_become_reasoning() {
        let url = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:streamGenerateContent?alt=sse";
        let http = Arc::new(MockHttpClient::new().with_sse_events(
            url,
            &[
                json!({"candidates": [{"content": {"parts": [{"text": "weighing options", "thought": true}]}}]}),
                text_event("42"),
            ],
        ));

        let objects: Vec<StreamObject> = provider(&http)
            .stream_object(
                &ModelSelectionQuery::model("gemini-2.5-pro"),
                vec![PromptMessage::user("meaning?")],
                ChatOptions::new().with_reasoning(true),
            )
            .await
            .unwrap()
            .map(|o| o.unwrap())
            .collect()
            .await;

        assert_eq!(
            objects,
            vec![
                StreamObject::Reasoning {
                    text_delta: "weighing options".into()
                },
                StreamObject::TextDelta {
                    text_delta: "42".into()
                },
            ]
        );
        let body = http.last_body().unwrap();
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 12000);
        assert_eq!(body["generationConfig"]["thinkingConfig"]["includeThoughts"], true);
    }

    #[tokio::test]
    async fn test_gemini_empty_text_is_an_error() {
        let http = Arc::new(MockHttpClient::new().with_sse_events(
            STREAM_URL,
            &[json!({"candidates": [{"finishReason": "SAFETY"}]})],
        ));

        let error = provider(&http)
            .text(&ModelSelectionQuery::default(), vec![PromptMessage::user("hi")], ChatOptions::new())
            .await
            .unwrap_err();

        assert_eq!(
            error,
            DomainError::provider_side("gemini", "unexpected_response", "Failed to generate text")
        );
    }

    #[tokio::test]
    async fn test_gemini_vendor_error() {
        let http = Arc::new(MockHttpClient::new().with_error(
            STREAM_URL,
            DomainError::http(
                Some(403),
                r#"{"error":{"code":403,"message":"Permission denied","status":"PERMISSION_DENIED"}}"#,
            ),
        ));

        let error = provider(&http)
            .text(&ModelSelectionQuery::default(), vec![PromptMessage::user("hi")], ChatOptions::new())
            .await
            .unwrap_err();

        assert_eq!(
            error,
            DomainError::provider_side("gemini", "permission_denied", "Permission denied")
        );
    }

    #[tokio::test]
    async fn test_gemini_structure() {
        let http = Arc::new(MockHttpClient::new().with_response(
            GENERATE_URL,
            json!({"candidates": [{"content": {"parts": [{"text": "```json\n{\"city\":\"Paris\"}\n```"}]}}]}),
        ));
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "additionalProperties": false,
        });
        let messages = vec![
            PromptMessage::system("extract").with_schema(schema),
            PromptMessage::user("I live in Paris"),
        ];

        let result = provider(&http)
            .structure(&ModelSelectionQuery::default(), messages, ChatOptions::new())
            .await
            .unwrap();

        assert_eq!(result, "{\"city\":\"Paris\"}");
        let body = http.last_body().unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(
            body["generationConfig"]["responseSchema"],
            json!({"type": "object", "properties": {"city": {"type": "string"}}})
        );
        assert!(body["generationConfig"].get("thinkingConfig").is_none());
    }

    #[tokio::test]
    async fn test_gemini_structure_honors_cancelled_signal() {
        let http = Arc::new(MockHttpClient::new().with_response(
            GENERATE_URL,
            json!({"candidates": [{"content": {"parts": [{"text": "{}"}]}}]}),
        ));
        let signal = CancellationToken::new();
        signal.cancel();
        let messages = vec![
            PromptMessage::system("json").with_schema(json!({"type": "object"})),
            PromptMessage::user("go"),
        ];

        let error = provider(&http)
            .structure(&ModelSelectionQuery::default(), messages, ChatOptions::new().with_signal(signal))
            .await
            .unwrap_err();

        assert!(error.is_aborted());
        assert!(http.last_body().is_none());
    }

    #[tokio::test]
    async fn test_gemini_embedding_drops_failed_inputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-embedding-005:embedContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(json!({"content": {"parts": [{"text": "good"}]}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"embedding": {"values": [0.5, 0.25]}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"content": {"parts": [{"text": "bad"}]}})))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let provider = GeminiProvider::with_base_url(Arc::new(HttpClient::new()), "g-key", server.uri());
        let embeddings = provider
            .embedding(
                &ModelSelectionQuery::default(),
                vec!["good".into(), "bad".into()],
                EmbeddingOptions::default().with_dimensions(2),
            )
            .await
            .unwrap();

        assert_eq!(embeddings, vec![vec![0.5, 0.25]]);

        let requests = server.received_requests().await.unwrap();
        let good: Value = requests
            .iter()
            .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap())
            .find(|b| b["content"]["parts"][0]["text"] == "good")
            .unwrap();
        assert_eq!(good["taskType"], "RETRIEVAL_DOCUMENT");
        assert_eq!(good["outputDimensionality"], 2);
        assert_eq!(requests.len(), 1 + 1 + EMBEDDING_MAX_RETRIES as usize);
    }

    #[test]
    fn test_tool_round_trip_wire_format() {
        let request = ChatRequest::builder()
            .message(ChatMessage::user("find rust docs"))
            .message(ChatMessage::new(
                MessageRole::Assistant,
                vec![ContentPart::ToolCall {
                    id: "call_1".into(),
                    name: "doc_keyword_search".into(),
                    args: json!({"query": "rust"}),
                }],
            ))
            .message(ChatMessage::new(
                MessageRole::Tool,
                vec![ContentPart::ToolResult {
                    id: "call_1".into(),
                    name: "doc_keyword_search".into(),
                    result: json!([{"docId": "d1"}]),
                }],
            ))
            .tools(vec![ToolDeclaration::Function {
                name: "doc_keyword_search".into(),
                description: "Search docs".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "additionalProperties": false,
                }),
            }])
            .build();

        let body = build_request(&request);

        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"],
            json!({"name": "doc_keyword_search", "args": {"query": "rust"}})
        );
        assert_eq!(body["contents"][2]["role"], "user");
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"],
            json!({"result": [{"docId": "d1"}]})
        );
        let declaration = &body["tools"][0]["functionDeclarations"][0];
        assert_eq!(declaration["name"], "doc_keyword_search");
        assert!(declaration["parameters"].get("additionalProperties").is_none());
    }

    #[test]
    fn test_inline_and_file_data_parts() {
        let image = ContentPart::Image {
            source: MediaSource::Base64("AAA".into()),
            mime_type: "image/png".into(),
        };
        let audio = ContentPart::File {
            source: MediaSource::Url("https://a.test/talk.mp3".into()),
            mime_type: "audio/mpeg".into(),
        };

        assert_eq!(
            wire_part(&image).unwrap(),
            json!({"inlineData": {"mimeType": "image/png", "data": "AAA"}})
        );
        assert_eq!(
            wire_part(&audio).unwrap(),
            json!({"fileData": {"mimeType": "audio/mpeg", "fileUri": "https://a.test/talk.mp3"}})
        );
        assert!(wire_part(&ContentPart::text("")).is_none());
    }

    #[test]
    fn test_decoder_function_calls_and_usage() {
        let mut decoder = ChunkDecoder::default();
        let first: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "web_search_exa", "args": {"query": "rust"}}}
            ]}}],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 2},
        }))
        .unwrap();
        let last: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "MAX_TOKENS"}],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "thoughtsTokenCount": 1},
        }))
        .unwrap();

        let chunks = decoder.decode(first).unwrap();
        assert!(matches!(
            &chunks[0],
            StreamChunk::ToolCall { tool_call_id, tool_name, args }
                if tool_call_id.starts_with("call_")
                    && tool_name == "web_search_exa"
                    && args == &json!({"query": "rust"})
        ));
        assert!(decoder.decode(last).unwrap().is_empty());
        assert_eq!(
            decoder.finish(),
            StreamChunk::Finish {
                finish_reason: FinishReason::Length,
                usage: Some(Usage::new(10, 6)),
            }
        );
    }

    #[test]
    fn test_thinking_only_on_2_5_models() {
        assert!(supports_thinking("gemini-2.5-flash"));
        assert!(!supports_thinking("gemini-2.0-flash-001"));
    }
}
