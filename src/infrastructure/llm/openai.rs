use async_stream::stream;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::http_client::{HttpClientTrait, MultipartFile, MultipartForm};
use super::normalizer::{infer_mime_type, NormalizeOptions, NormalizedPrompt, RequestNormalizer};
use super::openai_compat::{abortable, chat_body, vendor_error, Completion, CompletionBackend};
use super::pipeline::{collect_text, into_object_stream, into_text_stream, prepare_model};
use super::structured::parse_structured;
use super::tool_loop::{run_tool_loop, ChunkStream};
use crate::domain::llm::{
    ChatOptions, ChatRequest, CopilotProvider, EmbeddingOptions, ImageOptions, ImageStream,
    InputModality, ModelCapability, ModelSelectionQuery, ObjectStream, OutputModality,
    ProviderModel, ProviderType, TextStream,
};
use crate::domain::prompt::{check_embedding_input, PromptMessage};
use crate::domain::tool::{ToolCallContext, ToolKind, ToolOverride, ToolSet};
use crate::domain::DomainError;
use crate::infrastructure::metrics::{CallMetrics, Operation};
use crate::infrastructure::tools::ToolSetBuilder;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_MAX_RETRIES: u32 = 3;
const RERANK_MAX_TOKENS: u32 = 16;
const RERANK_TOP_LOGPROBS: u32 = 16;

fn default_models() -> Vec<ProviderModel> {
    use InputModality::{Image as InImage, Text as InText};
    use OutputModality::*;

    let chat = |id: &str| {
        ProviderModel::new(id, vec![ModelCapability::new(&[InText, InImage], &[Text, Object])])
    };
    let structured = |id: &str| {
        ProviderModel::new(
            id,
            vec![ModelCapability::new(&[InText, InImage], &[Text, Object, Structured])],
        )
    };

    vec![
        chat("gpt-4o"),
        chat("gpt-4o-mini"),
        ProviderModel::new(
            "gpt-4.1",
            vec![ModelCapability::new(&[InText, InImage], &[Text, Object, Structured]).as_default()],
        ),
        structured("gpt-4.1-2025-04-14"),
        structured("gpt-4.1-mini"),
        structured("gpt-4.1-nano"),
        chat("o1"),
        chat("o3"),
        chat("o4-mini"),
        ProviderModel::new(
            "text-embedding-3-large",
            vec![ModelCapability::new(&[InText], &[Embedding]).as_default()],
        ),
        ProviderModel::new(
            "text-embedding-3-small",
            vec![ModelCapability::new(&[InText], &[Embedding])],
        ),
        ProviderModel::new("dall-e-3", vec![ModelCapability::new(&[InText], &[Image])]),
        ProviderModel::new(
            "gpt-image-1",
            vec![ModelCapability::new(&[InText, InImage], &[Image]).as_default()],
        ),
    ]
}

/// o-series models reason natively and reject sampling parameters
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with('o')
}

/// OpenAI API provider
#[derive(Debug)]
pub struct OpenAiProvider<C: HttpClientTrait + 'static> {
    client: Arc<C>,
    api_key: String,
    auth_header: String,
    base_url: String,
    models: Vec<ProviderModel>,
    normalizer: RequestNormalizer,
    tools: Option<Arc<ToolSetBuilder>>,
}

impl<C: HttpClientTrait + 'static> OpenAiProvider<C> {
    pub fn new(client: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_OPENAI_BASE_URL)
    }

    pub fn with_base_url(
        client: Arc<C>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let auth_header = format!("Bearer {}", api_key);
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let normalizer = RequestNormalizer::new(client.clone());

        Self {
            client,
            api_key,
            auth_header,
            base_url,
            models: default_models(),
            normalizer,
            tools: None,
        }
    }

    /// Expose host tools to chat calls
    pub fn with_tools(mut self, tools: Arc<ToolSetBuilder>) -> Self {
        self.tools = Some(tools);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        vec![
            ("Authorization", self.auth_header.as_str()),
            ("Content-Type", "application/json"),
        ]
    }

    fn tool_override(kind: ToolKind) -> Option<ToolOverride> {
        match kind {
            // Edits need the Anthropic apply flow
            ToolKind::DocEdit => Some(ToolOverride::Skip),
            _ => None,
        }
    }

    fn tool_set(&self, options: &ChatOptions, ctx: &ToolCallContext) -> ToolSet {
        match &self.tools {
            Some(builder) if !options.tools.is_empty() => {
                builder.build(&options.tools, ctx, &Self::tool_override)
            }
            _ => ToolSet::new(),
        }
    }

    fn chat_request(
        &self,
        model: &str,
        prompt: NormalizedPrompt,
        options: &ChatOptions,
        tools: &ToolSet,
    ) -> ChatRequest {
        let mut builder = ChatRequest::builder()
            .system(prompt.system)
            .messages(prompt.messages)
            .tools(tools.declarations())
            .reasoning(options.reasoning);

        if !is_reasoning_model(model) {
            builder = builder
                .temperature(options.temperature.unwrap_or(DEFAULT_TEMPERATURE))
                .max_tokens(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        }
        builder.build()
    }

    fn backend(&self, model: &str, options: &ChatOptions) -> CompletionBackend {
        let mut extra = Map::new();
        if is_reasoning_model(model) {
            extra.insert(
                "max_completion_tokens".into(),
                json!(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            );
            if options.reasoning {
                extra.insert("reasoning_effort".into(), json!("medium"));
            }
        }
        if let Some(user) = &options.user {
            extra.insert("user".into(), json!(user));
        }

        CompletionBackend {
            provider: ProviderType::OpenAi,
            http: self.client.clone(),
            url: self.url("chat/completions"),
            auth_header: self.auth_header.clone(),
            model: model.to_string(),
            extra,
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
            .normalize(messages.clone(), NormalizeOptions::default())
            .await?;

        let ctx = ToolCallContext::from_options(options).with_messages(messages);
        let tools = self.tool_set(options, &ctx);
        let request = self.chat_request(&model.id, prompt, options, &tools);
        let backend = Arc::new(self.backend(&model.id, options));

        Ok(run_tool_loop(backend, request, tools, ctx))
    }

    async fn post(
        &self,
        path: &str,
        body: &Value,
        signal: &CancellationToken,
    ) -> Result<Value, DomainError> {
        let url = self.url(path);
        let request = async {
            self.client
                .post_json(&url, self.headers(), body)
                .await
                .map_err(|e| {
                    let e = vendor_error(ProviderType::OpenAi, e);
                    error!(path = %path, error = %e, "OpenAI request failed");
                    e
                })
        };
        abortable(signal, request).await
    }

    async fn rerank_one(
        &self,
        model: &str,
        messages: Vec<PromptMessage>,
        signal: &CancellationToken,
    ) -> Result<f32, DomainError> {
        let prompt = self
            .normalizer
            .normalize(messages, NormalizeOptions::default())
            .await?;
        let request = ChatRequest::builder()
            .system(prompt.system)
            .messages(prompt.messages)
            .temperature(0.0)
            .max_tokens(RERANK_MAX_TOKENS)
            .build();

        let mut body = chat_body(model, &request, false);
        body["logprobs"] = json!(true);
        body["top_logprobs"] = json!(RERANK_TOP_LOGPROBS);

        let response = self.post("chat/completions", &body, signal).await?;
        let choice = Completion::parse(ProviderType::OpenAi, response)?
            .into_first_choice(ProviderType::OpenAi)?;

        let top: Vec<TopLogprob> = choice
            .logprobs
            .and_then(|l| serde_json::from_value::<Logprobs>(l).ok())
            .and_then(|l| l.content.into_iter().next())
            .map(|first| first.top_logprobs)
            .unwrap_or_default();

        Ok(relevance_score(&top))
    }

    async fn image_edits(
        &self,
        model: &str,
        prompt: &str,
        message: &PromptMessage,
        signal: &CancellationToken,
    ) -> Result<Vec<String>, DomainError> {
        let mut form = MultipartForm::new()
            .text("model", model)
            .text("prompt", prompt)
            .text("output_format", "webp");

        for (index, attachment) in message.attachments.iter().flatten().enumerate() {
            let url = attachment.url();
            let mime_type = match attachment.mime_type() {
                Some(mime) => mime.to_string(),
                None => infer_mime_type(self.client.as_ref(), url).await,
            };
            if !mime_type.starts_with("image/") {
                debug!(url = %url, mime_type = %mime_type, "Skipping non-image attachment");
                continue;
            }
            match self.client.get_bytes(url).await {
                Ok(bytes) => {
                    form = form.file(MultipartFile {
                        field: "image[]".to_string(),
                        file_name: format!("{}.png", index),
                        mime_type,
                        bytes,
                    });
                }
                Err(e) => warn!(url = %url, error = %e, "Failed to fetch image attachment"),
            }
        }

        if form.files.is_empty() {
            return Err(DomainError::prompt_invalid(
                "No valid image attachments found. Please attach images.",
            ));
        }

        let url = self.url("images/edits");
        let headers = vec![("Authorization", self.auth_header.as_str())];
        let request = async {
            self.client
                .post_multipart(&url, headers, form)
                .await
                .map_err(|e| vendor_error(ProviderType::OpenAi, e))
        };
        let response = abortable(signal, request).await?;

        parse_images(response, "image/webp")
    }

    async fn image_generations(
        &self,
        model: &str,
        prompt: &str,
        options: &ImageOptions,
    ) -> Result<Vec<String>, DomainError> {
        let mut body = json!({
            "model": model,
            "prompt": prompt,
        });
        if let Some(quality) = &options.quality {
            body["quality"] = json!(quality);
        }
        if model.starts_with("dall-e") {
            body["response_format"] = json!("b64_json");
        }
        if let Some(user) = &options.user {
            body["user"] = json!(user);
        }

        let response = self.post("images/generations", &body, &options.signal).await?;
        parse_images(response, "image/png")
    }

    async fn structured_reply(
        &self,
        model: &ProviderModel,
        messages: Vec<PromptMessage>,
        options: &ChatOptions,
    ) -> Result<String, DomainError> {
        let prompt = self
            .normalizer
            .normalize(messages, NormalizeOptions::default())
            .await?;
        let schema = prompt
            .schema
            .clone()
            .ok_or_else(|| DomainError::prompt_invalid("Schema is required"))?;

        let request = self.chat_request(&model.id, prompt, options, &ToolSet::new());
        let mut body = chat_body(&model.id, &request, false);
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {"name": "response", "schema": schema},
        });
        if let Some(user) = &options.user {
            body["user"] = json!(user);
        }

        let attempts = options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES) + 1;
        for attempt in 1..=attempts {
            let response = self.post("chat/completions", &body, &options.signal).await?;
            let content = Completion::parse(ProviderType::OpenAi, response)?
                .into_first_choice(ProviderType::OpenAi)?
                .message
                .content
                .unwrap_or_default();

            if let Some(value) = parse_structured(&content) {
                return Ok(value.to_string());
            }
            warn!(model = %model.id, attempt, "Structured reply is not valid JSON, regenerating");
        }

        Err(DomainError::provider_side(
            ProviderType::OpenAi.as_str(),
            "unexpected_response",
            format!("No valid JSON after {} attempts", attempts),
        ))
    }

    async fn images(
        &self,
        model: &ProviderModel,
        messages: &[PromptMessage],
        options: &ImageOptions,
    ) -> Result<Vec<String>, DomainError> {
        let last = messages
            .last()
            .filter(|m| !m.content.is_empty())
            .ok_or_else(|| DomainError::prompt_invalid("Prompt is required"))?;

        if last.attachment_count() > 0 {
            self.image_edits(&model.id, &last.content, last, &options.signal)
                .await
        } else {
            self.image_generations(&model.id, &last.content, options).await
        }
    }

    async fn embeddings(
        &self,
        model: &str,
        inputs: Vec<String>,
        options: &EmbeddingOptions,
    ) -> Result<Vec<Vec<f32>>, DomainError> {
        let mut body = json!({
            "model": model,
            "input": inputs,
            "dimensions": options.dimensions(),
        });
        if let Some(user) = &options.user {
            body["user"] = json!(user);
        }

        let response = self.post("embeddings", &body, &options.signal).await?;
        let mut response: EmbeddingResponse = serde_json::from_value(response).map_err(|e| {
            DomainError::provider_side(
                ProviderType::OpenAi.as_str(),
                "unexpected_response",
                format!("Failed to parse response: {}", e),
            )
        })?;

        response.data.sort_by_key(|d| d.index);
        Ok(response
            .data
            .into_iter()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .collect())
    }
}

#[async_trait]
impl<C: HttpClientTrait + 'static> CopilotProvider for OpenAiProvider<C> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
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
        let call = CallMetrics::start(Operation::ChatText, ProviderType::OpenAi, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;

        let text = call.observe(collect_text(stream).await).inspect_err(|e| {
            error!(model = %model.id, error = %e, "OpenAI text generation failed");
        })?;
        Ok(text.trim().to_string())
    }

    async fn stream_text(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<TextStream, DomainError> {
        let model = prepare_model(self, query, OutputModality::Text, &messages, &options)?;
        let call = CallMetrics::start(Operation::ChatTextStream, ProviderType::OpenAi, &model.id);
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
        let call = CallMetrics::start(Operation::ChatObjectStream, ProviderType::OpenAi, &model.id);
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
        let call = CallMetrics::start(Operation::ChatText, ProviderType::OpenAi, &model.id);
        call.observe(self.structured_reply(&model, messages, &options).await)
    }

    async fn stream_images(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ImageOptions,
    ) -> Result<ImageStream, DomainError> {
        let model = prepare_model(
            self,
            query,
            OutputModality::Image,
            &messages,
            &ChatOptions::new(),
        )?;
        let call =
            CallMetrics::start(Operation::GenerateImagesStream, ProviderType::OpenAi, &model.id);
        let images = call.observe(self.images(&model, &messages, &options).await)?;

        let signal = options.signal.clone();
        Ok(Box::pin(stream! {
            for image in images {
                if signal.is_cancelled() {
                    break;
                }
                yield Ok(image);
            }
        }))
    }

    async fn embedding(
        &self,
        query: &ModelSelectionQuery,
        inputs: Vec<String>,
        options: EmbeddingOptions,
    ) -> Result<Vec<Vec<f32>>, DomainError> {
        check_embedding_input(&inputs)?;
        let query = query.clone().with_output(OutputModality::Embedding);
        let model = self.select_model(&query)?;
        let call = CallMetrics::start(Operation::GenerateEmbedding, ProviderType::OpenAi, &model.id);
        call.observe(self.embeddings(&model.id, inputs, &options).await)
    }

    async fn rerank(
        &self,
        query: &ModelSelectionQuery,
        groups: Vec<Vec<PromptMessage>>,
        options: ChatOptions,
    ) -> Result<Vec<f32>, DomainError> {
        let model = prepare_model(self, query, OutputModality::Text, &[], &options)?;
        let call = CallMetrics::start(Operation::Rerank, ProviderType::OpenAi, &model.id);
        let signal = &options.signal;
        call.observe(
            try_join_all(groups.into_iter().map(|g| self.rerank_one(&model.id, g, signal))).await,
        )
    }
}

/// pYes / (pYes + pNo) over the first token's alternatives
fn relevance_score(top: &[TopLogprob]) -> f32 {
    let by_token: HashMap<&str, f64> = top.iter().map(|t| (t.token.as_str(), t.logprob)).collect();

    let best = |token: &str| -> f64 {
        [format!(".{}", token), format!("_{}", token), format!(" {}", token), token.to_string()]
            .iter()
            .flat_map(|v| [v.clone(), v.to_lowercase(), v.to_uppercase()])
            .filter_map(|key| by_token.get(key.as_str()).copied())
            .fold(f64::NEG_INFINITY, f64::max)
    };

    let p_yes = best("Yes").exp();
    let p_no = best("No").exp();
    if p_yes + p_no == 0.0 {
        0.0
    } else {
        (p_yes / (p_yes + p_no)) as f32
    }
}

fn parse_images(response: Value, mime_type: &str) -> Result<Vec<String>, DomainError> {
    let response: ImageResponse = serde_json::from_value(response).map_err(|e| {
        DomainError::provider_side(
            ProviderType::OpenAi.as_str(),
            "unexpected_response",
            format!("Failed to parse image response: {}", e),
        )
    })?;

    if let Some(error) = response.error {
        return Err(DomainError::provider_side(
            ProviderType::OpenAi.as_str(),
            error.kind.unwrap_or_else(|| "image_error".to_string()),
            error.message,
        ));
    }

    Ok(response
        .data
        .into_iter()
        .filter_map(|d| d.b64_json)
        .map(|b64| format!("data:{};base64,{}", mime_type, b64))
        .collect())
}

#[derive(Debug, Deserialize)]
struct Logprobs {
    #[serde(default)]
    content: Vec<TokenLogprob>,
}

#[derive(Debug, Deserialize)]
struct TokenLogprob {
    #[serde(default)]
    top_logprobs: Vec<TopLogprob>,
}

#[derive(Debug, Deserialize)]
struct TopLogprob {
    token: String,
    logprob: f64,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
    error: Option<ImageError>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}
