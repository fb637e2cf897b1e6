//! Prompt catalog trait

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::Prompt;
use crate::domain::DomainError;

/// Lookup of named prompts
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PromptCatalog: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Prompt>, DomainError>;

    async fn list(&self) -> Result<Vec<Prompt>, DomainError>;
}

/// In-memory implementation of PromptCatalog
pub mod in_memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    use crate::domain::prompt::builtin_prompts;

    #[derive(Debug, Default)]
    pub struct InMemoryPromptCatalog {
        prompts: RwLock<HashMap<String, Prompt>>,
    }

    impl InMemoryPromptCatalog {
        pub fn new() -> Self {
            Self::default()
        }

        /// Catalog preloaded with the prompts the built-in tools call
        pub fn with_builtin() -> Self {
            let prompts = builtin_prompts()
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect();
            Self {
                prompts: RwLock::new(prompts),
            }
        }

        pub async fn insert(&self, prompt: Prompt) {
            self.prompts
                .write()
                .await
                .insert(prompt.name().to_string(), prompt);
        }
    }

    #[async_trait]
    impl PromptCatalog for InMemoryPromptCatalog {
        async fn get(&self, name: &str) -> Result<Option<Prompt>, DomainError> {
            Ok(self.prompts.read().await.get(name).cloned())
        }

        async fn list(&self) -> Result<Vec<Prompt>, DomainError> {
            let mut prompts: Vec<Prompt> = self.prompts.read().await.values().cloned().collect();
            prompts.sort_by(|a, b| a.name().cmp(b.name()));
            Ok(prompts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::in_memory::InMemoryPromptCatalog;
    use super::*;
    use crate::domain::prompt::PromptMessage;

    #[tokio::test]
    async fn test_builtin_catalog() {
        let catalog = InMemoryPromptCatalog::with_builtin();

        for name in [
            "Apply Updates",
            "Code Artifact",
            "Conversation Summary",
            "Write an article about this",
        ] {
            assert!(catalog.get(name).await.unwrap().is_some(), "{}", name);
        }
        assert!(catalog.get("Unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_replaces_by_name() {
        let catalog = InMemoryPromptCatalog::new();
        catalog
            .insert(Prompt::new("P", "a", vec![PromptMessage::user("x")]))
            .await;
        catalog
            .insert(Prompt::new("P", "b", vec![PromptMessage::user("x")]))
            .await;

        let prompts = catalog.list().await.unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].model(), "b");
    }
}
