//! Registry of usable providers and request routing

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::llm::{ChatOptions, CopilotProvider, ModelSelectionQuery, ProviderType};
use crate::domain::prompt::PromptMessage;
use crate::domain::tool::TextModelRouter;
use crate::domain::DomainError;

/// Providers that are currently configured, in registration order.
///
/// Registration and selection may race during a configuration reload, so
/// the list sits behind a single reader-writer lock.
#[derive(Debug, Default)]
pub struct ProviderFactory {
    providers: RwLock<Vec<Arc<dyn CopilotProvider>>>,
    enabled: AtomicBool,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. Re-registering a type replaces it in place.
    pub async fn register(&self, provider: Arc<dyn CopilotProvider>) {
        let provider_type = provider.provider_type();
        let mut providers = self.providers.write().await;

        match providers
            .iter()
            .position(|p| p.provider_type() == provider_type)
        {
            Some(index) => providers[index] = provider,
            None => providers.push(provider),
        }

        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!("Copilot enabled");
        }
        info!(provider = %provider_type, "Registered copilot provider");
    }

    pub async fn unregister(&self, provider_type: ProviderType) {
        let mut providers = self.providers.write().await;
        let before = providers.len();
        providers.retain(|p| p.provider_type() != provider_type);

        if providers.len() != before {
            info!(provider = %provider_type, "Unregistered copilot provider");
        }
        if providers.is_empty() && self.enabled.swap(false, Ordering::SeqCst) {
            info!("Copilot disabled, no provider is configured");
        }
    }

    /// Register or unregister a provider according to its current configuration
    pub async fn reconcile(&self, provider: Arc<dyn CopilotProvider>) {
        if provider.configured() {
            self.register(provider).await;
        } else {
            self.unregister(provider.provider_type()).await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub async fn providers(&self) -> Vec<Arc<dyn CopilotProvider>> {
        self.providers.read().await.clone()
    }

    /// First provider, in registration order, with a model satisfying `query`
    pub async fn get_provider(
        &self,
        query: &ModelSelectionQuery,
        prefer: Option<ProviderType>,
    ) -> Option<Arc<dyn CopilotProvider>> {
        let providers = self.providers.read().await;
        let found = providers
            .iter()
            .filter(|p| prefer.is_none_or(|ty| p.provider_type() == ty))
            .find(|p| p.matches(query))
            .cloned();

        debug!(
            model = ?query.model_id,
            output = ?query.output_type,
            provider = ?found.as_ref().map(|p| p.provider_type()),
            "Resolved provider"
        );
        found
    }

    /// First provider serving `model_id`
    pub async fn get_provider_by_model(
        &self,
        model_id: &str,
        prefer: Option<ProviderType>,
    ) -> Option<Arc<dyn CopilotProvider>> {
        let providers = self.providers.read().await;
        providers
            .iter()
            .filter(|p| prefer.is_none_or(|ty| p.provider_type() == ty))
            .find(|p| p.configured() && p.models().iter().any(|m| m.id == model_id))
            .cloned()
    }
}

/// Routes tool-side text generation back through a factory without keeping it alive
#[derive(Debug, Clone)]
pub struct FactoryTextRouter {
    factory: Weak<ProviderFactory>,
}

impl FactoryTextRouter {
    pub fn new(factory: &Arc<ProviderFactory>) -> Self {
        Self {
            factory: Arc::downgrade(factory),
        }
    }

    async fn provider_for(&self, model: &str) -> Option<Arc<dyn CopilotProvider>> {
        let factory = self.factory.upgrade()?;
        factory.get_provider_by_model(model, None).await
    }
}

#[async_trait]
impl TextModelRouter for FactoryTextRouter {
    async fn has_model(&self, model: &str) -> bool {
        self.provider_for(model).await.is_some()
    }

    async fn generate_text(
        &self,
        model: &str,
        messages: Vec<PromptMessage>,
        options: ChatOptions,
    ) -> Result<String, DomainError> {
        let provider = self.provider_for(model).await.ok_or_else(|| {
            DomainError::prompt_invalid(format!("No provider serves model {}", model))
        })?;
        provider
            .text(&ModelSelectionQuery::model(model), messages, options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::{
        InputModality, MockCopilotProvider, ModelCapability, OutputModality, ProviderModel,
    };

    fn text_model(id: &str) -> ProviderModel {
        ProviderModel::new(
            id,
            vec![ModelCapability::new(&[InputModality::Text], &[OutputModality::Text]).as_default()],
        )
    }

    fn provider(ty: ProviderType, models: &[&str]) -> Arc<MockCopilotProvider> {
        Arc::new(MockCopilotProvider::new(
            ty,
            models.iter().map(|m| text_model(m)).collect(),
        ))
    }

    #[tokio::test]
    async fn test_enabled_flag_follows_registry() {
        let factory = ProviderFactory::new();
        assert!(!factory.is_enabled());

        factory.register(provider(ProviderType::OpenAi, &["gpt-4.1"])).await;
        factory.register(provider(ProviderType::Morph, &["morph-v3-fast"])).await;
        assert!(factory.is_enabled());

        factory.unregister(ProviderType::OpenAi).await;
        assert!(factory.is_enabled());

        factory.unregister(ProviderType::Morph).await;
        assert!(!factory.is_enabled());
    }

    #[tokio::test]
    async fn test_get_provider_first_match_in_order() {
        let factory = ProviderFactory::new();
        factory.register(provider(ProviderType::OpenAi, &["shared"])).await;
        factory.register(provider(ProviderType::Morph, &["shared"])).await;

        let query = ModelSelectionQuery::output(OutputModality::Text);
        let found = factory.get_provider(&query, None).await.unwrap();
        assert_eq!(found.provider_type(), ProviderType::OpenAi);

        let preferred = factory
            .get_provider(&query, Some(ProviderType::Morph))
            .await
            .unwrap();
        assert_eq!(preferred.provider_type(), ProviderType::Morph);

        let by_model = factory.get_provider_by_model("shared", None).await.unwrap();
        assert_eq!(by_model.provider_type(), ProviderType::OpenAi);

        assert!(factory.get_provider_by_model("unknown", None).await.is_none());
        assert!(factory
            .get_provider(&query, Some(ProviderType::Anthropic))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_register_same_type_replaces_in_place() {
        let factory = ProviderFactory::new();
        factory.register(provider(ProviderType::OpenAi, &["a"])).await;
        factory.register(provider(ProviderType::Morph, &["b"])).await;
        factory.register(provider(ProviderType::OpenAi, &["c"])).await;

        let providers = factory.providers().await;
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].models()[0].id, "c");
    }

    #[tokio::test]
    async fn test_reconcile_follows_configuration() {
        let factory = ProviderFactory::new();
        let configured = Arc::new(
            MockCopilotProvider::new(ProviderType::Perplexity, vec![text_model("sonar")]),
        );
        factory.reconcile(configured).await;
        assert!(factory.is_enabled());

        let removed = Arc::new(
            MockCopilotProvider::new(ProviderType::Perplexity, vec![text_model("sonar")])
                .with_configured(false),
        );
        factory.reconcile(removed).await;
        assert!(!factory.is_enabled());
        assert!(factory.providers().await.is_empty());
    }

    #[tokio::test]
    async fn test_text_router_reaches_owning_provider() {
        let factory = Arc::new(ProviderFactory::new());
        factory
            .register(Arc::new(
                MockCopilotProvider::new(ProviderType::Morph, vec![text_model("morph-v3-large")])
                    .with_reply("merged"),
            ))
            .await;

        let router = FactoryTextRouter::new(&factory);
        assert!(router.has_model("morph-v3-large").await);
        assert!(!router.has_model("gpt-4.1").await);

        let text = router
            .generate_text(
                "morph-v3-large",
                vec![PromptMessage::user("x")],
                ChatOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(text, "merged");

        drop(factory);
        assert!(!router.has_model("morph-v3-large").await);
    }
}
