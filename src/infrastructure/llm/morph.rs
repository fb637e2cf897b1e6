use async_trait::async_trait;
use serde_json::Map;
use std::sync::Arc;
use tracing::error;

use super::http_client::HttpClientTrait;
use super::normalizer::{NormalizeOptions, RequestNormalizer};
use super::openai_compat::CompletionBackend;
use super::pipeline::{collect_text, into_text_stream, prepare_model};
use super::tool_loop::{run_tool_loop, ChunkStream};
use crate::domain::llm::{
    ChatOptions, ChatRequest, CopilotProvider, InputModality, ModelCapability,
    ModelSelectionQuery, OutputModality, ProviderModel, ProviderType, TextStream,
};
use crate::domain::prompt::PromptMessage;
use crate::domain::tool::{ToolCallContext, ToolSet};
use crate::domain::DomainError;
use crate::infrastructure::metrics::{CallMetrics, Operation};

const DEFAULT_MORPH_BASE_URL: &str = "https://api.morphllm.com/v1";

fn default_models() -> Vec<ProviderModel> {
    ["morph-v2", "morph-v3-fast", "morph-v3-large"]
        .into_iter()
        .map(|id| {
            ProviderModel::new(
                id,
                vec![ModelCapability::new(&[InputModality::Text], &[OutputModality::Text])],
            )
        })
        .collect()
}

/// Morph fast-apply models, reached by explicit model id only
#[derive(Debug)]
pub struct MorphProvider<C: HttpClientTrait + 'static> {
    client: Arc<C>,
    api_key: String,
    base_url: String,
    models: Vec<ProviderModel>,
    normalizer: RequestNormalizer,
}

impl<C: HttpClientTrait + 'static> MorphProvider<C> {
    pub fn new(client: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_MORPH_BASE_URL)
    }

    pub fn with_base_url(
        client: Arc<C>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let normalizer = RequestNormalizer::new(client.clone());

        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models: default_models(),
            normalizer,
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
            .normalize(messages, NormalizeOptions::default())
            .await?;

        let request = ChatRequest::builder()
            .system(prompt.system)
            .messages(prompt.messages)
            .build();

        let backend = Arc::new(CompletionBackend {
            provider: ProviderType::Morph,
            http: self.client.clone(),
            url: format!("{}/chat/completions", self.base_url),
            auth_header: format!("Bearer {}", self.api_key),
            model: model.id.clone(),
            extra: Map::new(),
        });

        Ok(run_tool_loop(
            backend,
            request,
            ToolSet::new(),
            ToolCallContext::from_options(options),
        ))
    }
}

#[async_trait]
impl<C: HttpClientTrait + 'static> CopilotProvider for MorphProvider<C> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Morph
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
        let call = CallMetrics::start(Operation::ChatText, ProviderType::Morph, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;

        let text = call.observe(collect_text(stream).await).inspect_err(|e| {
            error!(model = %model.id, error = %e, "Morph text generation failed");
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
        let call = CallMetrics::start(Operation::ChatTextStream, ProviderType::Morph, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;
        Ok(call.observe_stream(into_text_stream(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::llm::http_client::mock::MockHttpClient;
    use futures::StreamExt;
    use serde_json::json;

    const TEST_URL: &str = "https://api.morphllm.com/v1/chat/completions";

    fn provider(http: &Arc<MockHttpClient>) -> MorphProvider<MockHttpClient> {
        MorphProvider::new(http.clone(), "morph-key")
    }

    #[tokio::test]
    async fn test_morph_apply() {
        let http = Arc::new(MockHttpClient::new().with_sse_events(
            TEST_URL,
            &[json!({"choices": [{"delta": {"content": "# Title\nupdated\n"}}]})],
        ));

        let text = provider(&http)
            .text(
                &ModelSelectionQuery::model("morph-v3-large"),
                vec![PromptMessage::user("<code>a</code><update>b</update>")],
                ChatOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(text, "# Title\nupdated");
        let body = http.last_body().unwrap();
        assert_eq!(body["model"], "morph-v3-large");
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_morph_stream_text() {
        let http = Arc::new(MockHttpClient::new().with_sse_events(
            TEST_URL,
            &[
                json!({"choices": [{"delta": {"content": "a"}}]}),
                json!({"choices": [{"delta": {"content": "b"}, "finish_reason": "stop"}]}),
            ],
        ));

        let text: Vec<String> = provider(&http)
            .stream_text(
                &ModelSelectionQuery::model("morph-v3-fast"),
                vec![PromptMessage::user("x")],
                ChatOptions::new(),
            )
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;

        assert_eq!(text.concat(), "ab");
    }

    #[test]
    fn test_morph_has_no_default_model() {
        let http = Arc::new(MockHttpClient::new());
        let provider = provider(&http);

        assert!(!provider.matches(&ModelSelectionQuery::output(OutputModality::Text)));
        assert!(provider.matches(&ModelSelectionQuery::model("morph-v2")));
    }
}
