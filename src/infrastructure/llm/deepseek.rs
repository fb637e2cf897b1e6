use async_trait::async_trait;
use serde_json::Map;
use std::sync::Arc;
use tracing::error;

use super::http_client::HttpClientTrait;
use super::normalizer::{NormalizeOptions, RequestNormalizer};
use super::openai_compat::CompletionBackend;
use super::pipeline::{collect_text, into_object_stream, into_text_stream, prepare_model};
use super::tool_loop::{run_tool_loop, ChunkStream};
use crate::domain::llm::{
    ChatOptions, ChatRequest, CopilotProvider, InputModality, ModelCapability,
    ModelSelectionQuery, ObjectStream, OutputModality, ProviderModel, ProviderType, TextStream,
};
use crate::domain::prompt::PromptMessage;
use crate::domain::tool::{ToolCallContext, ToolSet};
use crate::domain::DomainError;
use crate::infrastructure::metrics::{CallMetrics, Operation};

const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

fn default_models() -> Vec<ProviderModel> {
    ["deepseek-chat", "deepseek-coder-v3"]
        .into_iter()
        .map(|id| {
            ProviderModel::new(
                id,
                vec![ModelCapability::new(
                    &[InputModality::Text],
                    &[OutputModality::Text, OutputModality::Object],
                )],
            )
        })
        .collect()
}

/// DeepSeek chat over its OpenAI-compatible endpoint. Text in, no tools.
#[derive(Debug)]
pub struct DeepSeekProvider<C: HttpClientTrait + 'static> {
    client: Arc<C>,
    api_key: String,
    base_url: String,
    models: Vec<ProviderModel>,
    normalizer: RequestNormalizer,
}

impl<C: HttpClientTrait + 'static> DeepSeekProvider<C> {
    pub fn new(client: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_DEEPSEEK_BASE_URL)
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

        let mut request = ChatRequest::builder()
            .system(prompt.system)
            .messages(prompt.messages)
            .build();
        request.temperature = options.temperature;
        request.max_tokens = options.max_tokens;

        let backend = Arc::new(CompletionBackend {
            provider: ProviderType::DeepSeek,
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
impl<C: HttpClientTrait + 'static> CopilotProvider for DeepSeekProvider<C> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::DeepSeek
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
        let call = CallMetrics::start(Operation::ChatText, ProviderType::DeepSeek, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;

        let text = call.observe(collect_text(stream).await).inspect_err(|e| {
            error!(model = %model.id, error = %e, "DeepSeek text generation failed");
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
        let call = CallMetrics::start(Operation::ChatTextStream, ProviderType::DeepSeek, &model.id);
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
            CallMetrics::start(Operation::ChatObjectStream, ProviderType::DeepSeek, &model.id);
        let stream = call.observe(self.full_stream(&model, messages, &options).await)?;
        Ok(call.observe_stream(into_object_stream(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stream::StreamObject;
    use crate::infrastructure::llm::http_client::mock::MockHttpClient;
    use futures::StreamExt;
    use serde_json::json;

    const TEST_URL: &str = "https://api.deepseek.com/v1/chat/completions";

    fn provider(http: &Arc<MockHttpClient>) -> DeepSeekProvider<MockHttpClient> {
        DeepSeekProvider::new(http.clone(), "ds-key")
    }

    #[tokio::test]
    async fn test_deepseek_text() {
        let http = Arc::new(MockHttpClient::new().with_sse_events(
            TEST_URL,
            &[
                json!({"choices": [{"delta": {"content": " fn main() {} "}}]}),
                json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
            ],
        ));

        let text = provider(&http)
            .text(
                &ModelSelectionQuery::model("deepseek-chat"),
                vec![PromptMessage::system("be terse"), PromptMessage::user("rust hello")],
                ChatOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(text, "fn main() {}");
        let body = http.last_body().unwrap();
        assert_eq!(body["model"], "deepseek-chat");
        assert!(body.get("tools").is_none());
        assert_eq!(http.bodies_for(TEST_URL).len(), 1);
    }

    #[tokio::test]
    async fn test_deepseek_stream_object_carries_reasoning() {
        let http = Arc::new(MockHttpClient::new().with_sse_events(
            TEST_URL,
            &[
                json!({"choices": [{"delta": {"reasoning_content": "hmm"}}]}),
                json!({"choices": [{"delta": {"content": "42"}, "finish_reason": "stop"}]}),
            ],
        ));

        let objects: Vec<StreamObject> = provider(&http)
            .stream_object(
                &ModelSelectionQuery::model("deepseek-coder-v3"),
                vec![PromptMessage::user("answer")],
                ChatOptions::new(),
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
                    text_delta: "hmm".into()
                },
                StreamObject::TextDelta {
                    text_delta: "42".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_deepseek_vendor_error() {
        let http = Arc::new(MockHttpClient::new().with_error(
            TEST_URL,
            DomainError::http(
                Some(402),
                r#"{"error":{"message":"Insufficient Balance","type":"unknown_error"}}"#,
            ),
        ));

        let error = provider(&http)
            .stream_text(
                &ModelSelectionQuery::model("deepseek-chat"),
                vec![PromptMessage::user("hi")],
                ChatOptions::new(),
            )
            .await
            .unwrap()
            .next()
            .await
            .unwrap()
            .unwrap_err();

        assert_eq!(
            error,
            DomainError::provider_side("deepseek", "unknown_error", "Insufficient Balance")
        );
    }

    #[test]
    fn test_deepseek_rejects_attachments_and_has_no_default() {
        let http = Arc::new(MockHttpClient::new());
        let provider = provider(&http);

        assert!(!provider.matches(&ModelSelectionQuery::output(OutputModality::Text)));
        assert!(provider.matches(&ModelSelectionQuery::model("deepseek-chat")));
        assert!(!provider.matches(
            &ModelSelectionQuery::model("deepseek-chat").with_inputs(&[InputModality::Image])
        ));
    }
}
