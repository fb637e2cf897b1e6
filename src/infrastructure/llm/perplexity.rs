use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error};

use super::http_client::HttpClientTrait;
use super::normalizer::{NormalizeOptions, RequestNormalizer};
use super::openai_compat::{chat_body, vendor_error, CompletionChunk, CompletionDecoder};
use super::pipeline::prepare_model;
use super::sse::sse_messages;
use crate::domain::llm::{
    ChatOptions, ChatRequest, CopilotProvider, InputModality, ModelCapability,
    ModelSelectionQuery, OutputModality, ProviderModel, ProviderType, TextStream,
};
use crate::domain::prompt::PromptMessage;
use crate::domain::stream::{CitationParser, StreamChunk};
use crate::domain::DomainError;
use crate::infrastructure::metrics::{CallMetrics, Operation};

const DEFAULT_PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_TOKENS: u32 = 4096;
const THINK_SEPARATOR: &str = "\n---\n";

static THINK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?think>\n?").unwrap());

fn default_models() -> Vec<ProviderModel> {
    let capability = || ModelCapability::new(&[InputModality::Text], &[OutputModality::Text]);

    vec![
        ProviderModel::new("sonar", vec![capability().as_default()]),
        ProviderModel::new("sonar-pro", vec![capability()]),
        ProviderModel::new("sonar-reasoning", vec![capability()]),
        ProviderModel::new("sonar-reasoning-pro", vec![capability()]),
    ]
}

/// Perplexity search-grounded chat
#[derive(Debug)]
pub struct PerplexityProvider<C: HttpClientTrait + 'static> {
    client: Arc<C>,
    api_key: String,
    auth_header: String,
    base_url: String,
    models: Vec<ProviderModel>,
    normalizer: RequestNormalizer,
}

impl<C: HttpClientTrait + 'static> PerplexityProvider<C> {
    pub fn new(client: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_PERPLEXITY_BASE_URL)
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
        }
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        vec![
            ("Authorization", self.auth_header.as_str()),
            ("Content-Type", "application/json"),
        ]
    }

    async fn cited_stream(
        &self,
        model: &ProviderModel,
        messages: Vec<PromptMessage>,
        options: &ChatOptions,
    ) -> Result<TextStream, DomainError> {
        let prompt = self
            .normalizer
            .normalize(
                messages,
                NormalizeOptions {
                    with_attachment: false,
                    use_base64: false,
                },
            )
            .await?;

        let request = ChatRequest::builder()
            .system(prompt.system)
            .messages(prompt.messages)
            .temperature(options.temperature.unwrap_or(DEFAULT_TEMPERATURE))
            .max_tokens(options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
            .build();
        let mut body = chat_body(&model.id, &request, true);
        if let Some(body) = body.as_object_mut() {
            body.remove("stream_options");
        }

        let bytes = self
            .client
            .post_json_stream(&self.chat_completions_url(), self.headers(), &body)
            .await
            .map_err(|e| {
                let e = vendor_error(ProviderType::Perplexity, e);
                error!(model = %model.id, error = %e, "Perplexity request failed");
                e
            })?;

        let mut events = sse_messages(bytes);
        let signal = options.signal.clone();

        Ok(Box::pin(stream! {
            let mut decoder = CompletionDecoder::new();
            let mut citations = CitationParser::new();
            let mut has_sources = false;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        debug!("Perplexity stream cancelled");
                        return;
                    }
                    next = events.next() => next,
                };
                let Some(event) = next else { break };

                let chunk = match event.and_then(|e| e.json::<CompletionChunk>()) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(vendor_error(ProviderType::Perplexity, e));
                        return;
                    }
                };

                if !has_sources {
                    if let Some(sources) = chunk.citations.as_ref().filter(|c| !c.is_empty()) {
                        for source in sources {
                            citations.push(source.as_str());
                        }
                        has_sources = true;
                    }
                }

                let decoded = match decoder.decode(ProviderType::Perplexity, chunk) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                for chunk in decoded {
                    if let StreamChunk::TextDelta { text_delta } = chunk {
                        let text = THINK_MARKER.replace_all(&text_delta, THINK_SEPARATOR);
                        let rendered = citations.parse(&text);
                        if !rendered.is_empty() {
                            yield Ok(rendered);
                        }
                    }
                }
            }

            let tail = citations.end();
            if !tail.is_empty() {
                yield Ok(tail);
            }
        }))
    }
}

#[async_trait]
impl<C: HttpClientTrait + 'static> CopilotProvider for PerplexityProvider<C> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Perplexity
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
        let call = CallMetrics::start(Operation::ChatText, ProviderType::Perplexity, &model.id);
        let mut stream = call.observe(self.cited_stream(&model, messages, &options).await)?;

        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            text.push_str(&call.observe(delta)?);
        }
        Ok(text)
    }

    /// Text with `<think>` sections fenced off and vendor sources as footnotes
    async fn stream_text(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<TextStream, DomainError> {
        let model = prepare_model(self, query, OutputModality::Text, &messages, &options)?;
        let call =
            CallMetrics::start(Operation::ChatTextStream, ProviderType::Perplexity, &model.id);
        let stream = call.observe(self.cited_stream(&model, messages, &options).await)?;
        Ok(call.observe_stream(stream))
    }
}
