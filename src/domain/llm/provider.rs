use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::pin::Pin;
use std::str::FromStr;

use super::{
    find_valid_model, select_model, ChatOptions, EmbeddingOptions, ImageOptions,
    ModelSelectionQuery, ProviderModel,
};
use crate::domain::prompt::PromptMessage;
use crate::domain::stream::StreamObject;
use crate::domain::DomainError;

/// Text deltas, already normalized for display
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, DomainError>> + Send>>;

/// Canonical structured events
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<StreamObject, DomainError>> + Send>>;

/// Image URLs or data URIs
pub type ImageStream = Pin<Box<dyn Stream<Item = Result<String, DomainError>> + Send>>;

/// Vendor behind a provider adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Perplexity,
    Morph,
    #[serde(rename = "deepseek")]
    DeepSeek,
    Gemini,
    Fal,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Perplexity => "perplexity",
            Self::Morph => "morph",
            Self::DeepSeek => "deepseek",
            Self::Gemini => "gemini",
            Self::Fal => "fal",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "perplexity" => Ok(Self::Perplexity),
            "morph" => Ok(Self::Morph),
            "deepseek" => Ok(Self::DeepSeek),
            "gemini" => Ok(Self::Gemini),
            "fal" => Ok(Self::Fal),
            other => Err(DomainError::configuration(format!(
                "Unknown provider type: {}",
                other
            ))),
        }
    }
}

/// Common contract every vendor adapter implements.
///
/// Only identity, the model list and the configured predicate are required.
/// Each capability defaults to `ProviderNotSupported`, so an adapter opts in
/// to exactly what its vendor can do.
#[async_trait]
pub trait CopilotProvider: Send + Sync + Debug {
    fn provider_type(&self) -> ProviderType;

    fn models(&self) -> &[ProviderModel];

    /// Whether credentials are present for this provider
    fn configured(&self) -> bool;

    fn matches(&self, query: &ModelSelectionQuery) -> bool {
        self.configured() && find_valid_model(self.models(), query).is_some()
    }

    fn select_model(&self, query: &ModelSelectionQuery) -> Result<&ProviderModel, DomainError> {
        select_model(self.provider_type().as_str(), self.models(), query)
    }

    fn not_supported(&self, kind: &str) -> DomainError {
        DomainError::not_supported(self.provider_type().as_str(), kind)
    }

    async fn text(
        &self,
        _query: &ModelSelectionQuery,
        _messages: Vec<PromptMessage>,
        _options: ChatOptions,
    ) -> Result<String, DomainError> {
        Err(self.not_supported("text"))
    }

    async fn stream_text(
        &self,
        _query: &ModelSelectionQuery,
        _messages: Vec<PromptMessage>,
        _options: ChatOptions,
    ) -> Result<TextStream, DomainError> {
        Err(self.not_supported("text-stream"))
    }

    async fn stream_object(
        &self,
        _query: &ModelSelectionQuery,
        _messages: Vec<PromptMessage>,
        _options: ChatOptions,
    ) -> Result<ObjectStream, DomainError> {
        Err(self.not_supported("object-stream"))
    }

    /// JSON text conforming to the schema carried by the system message
    async fn structure(
        &self,
        _query: &ModelSelectionQuery,
        _messages: Vec<PromptMessage>,
        _options: ChatOptions,
    ) -> Result<String, DomainError> {
        Err(self.not_supported("structure"))
    }

    async fn stream_images(
        &self,
        _query: &ModelSelectionQuery,
        _messages: Vec<PromptMessage>,
        _options: ImageOptions,
    ) -> Result<ImageStream, DomainError> {
        Err(self.not_supported("image"))
    }

    async fn embedding(
        &self,
        _query: &ModelSelectionQuery,
        _inputs: Vec<String>,
        _options: EmbeddingOptions,
    ) -> Result<Vec<Vec<f32>>, DomainError> {
        Err(self.not_supported("embedding"))
    }

    /// Relevance of each message group, each score in `0..=1`
    async fn rerank(
        &self,
        _query: &ModelSelectionQuery,
        _groups: Vec<Vec<PromptMessage>>,
        _options: ChatOptions,
    ) -> Result<Vec<f32>, DomainError> {
        Err(self.not_supported("rerank"))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use futures::stream;

    /// Provider double that answers text calls with a fixed reply
    #[derive(Debug)]
    pub struct MockCopilotProvider {
        provider_type: ProviderType,
        models: Vec<ProviderModel>,
        configured: bool,
        reply: String,
    }

    impl MockCopilotProvider {
        pub fn new(provider_type: ProviderType, models: Vec<ProviderModel>) -> Self {
            Self {
                provider_type,
                models,
                configured: true,
                reply: String::new(),
            }
        }

        pub fn with_configured(mut self, configured: bool) -> Self {
            self.configured = configured;
            self
        }

        pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
            self.reply = reply.into();
            self
        }
    }

    #[async_trait]
    impl CopilotProvider for MockCopilotProvider {
        fn provider_type(&self) -> ProviderType {
            self.provider_type
        }

        fn models(&self) -> &[ProviderModel] {
            &self.models
        }

        fn configured(&self) -> bool {
            self.configured
        }

        async fn text(
            &self,
            query: &ModelSelectionQuery,
            _messages: Vec<PromptMessage>,
            _options: ChatOptions,
        ) -> Result<String, DomainError> {
            self.select_model(query)?;
            Ok(self.reply.clone())
        }

        async fn stream_text(
            &self,
            query: &ModelSelectionQuery,
            _messages: Vec<PromptMessage>,
            _options: ChatOptions,
        ) -> Result<TextStream, DomainError> {
            self.select_model(query)?;
            let chunks: Vec<Result<String, DomainError>> =
                self.reply.chars().map(|c| Ok(c.to_string())).collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockCopilotProvider;
    use super::*;
    use crate::domain::llm::{InputModality, ModelCapability, OutputModality};
    use futures::StreamExt;

    fn provider() -> MockCopilotProvider {
        MockCopilotProvider::new(
            ProviderType::Morph,
            vec![ProviderModel::new(
                "morph-v3-fast",
                vec![ModelCapability::new(&[InputModality::Text], &[OutputModality::Text]).as_default()],
            )],
        )
        .with_reply("ok")
    }

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!("OpenAI".parse::<ProviderType>().unwrap(), ProviderType::OpenAi);
        assert_eq!(ProviderType::Anthropic.to_string(), "anthropic");
        assert_eq!("Gemini".parse::<ProviderType>().unwrap(), ProviderType::Gemini);
        assert_eq!("FAL".parse::<ProviderType>().unwrap(), ProviderType::Fal);
        assert!("mistral".parse::<ProviderType>().is_err());
        assert_eq!(
            serde_json::to_string(&ProviderType::OpenAi).unwrap(),
            "\"openai\""
        );
        assert_eq!(
            serde_json::to_string(&ProviderType::DeepSeek).unwrap(),
            "\"deepseek\""
        );
    }

    #[test]
    fn test_matches_requires_configuration() {
        let query = ModelSelectionQuery::model("morph-v3-fast");
        assert!(provider().matches(&query));
        assert!(!provider().with_configured(false).matches(&query));
        assert!(!provider().matches(&ModelSelectionQuery::model("gpt-4.1")));
    }

    #[tokio::test]
    async fn test_unimplemented_capabilities_are_not_supported() {
        let provider = provider();
        let query = ModelSelectionQuery::output(OutputModality::Embedding);

        let error = provider
            .embedding(&query, vec!["a".into()], EmbeddingOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error, DomainError::not_supported("morph", "embedding"));

        let error = provider
            .rerank(&query, vec![], ChatOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error, DomainError::not_supported("morph", "rerank"));

        let error = provider
            .structure(&query, vec![], ChatOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error, DomainError::not_supported("morph", "structure"));
    }

    #[tokio::test]
    async fn test_mock_stream_text() {
        let query = ModelSelectionQuery::output(OutputModality::Text);
        let stream = provider()
            .stream_text(&query, vec![PromptMessage::user("hi")], ChatOptions::new())
            .await
            .unwrap();
        let text: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(text.concat(), "ok");
    }
}
