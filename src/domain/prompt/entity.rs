//! Named prompts stored in the catalog

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{PromptMessage, PromptTemplate, TemplateError};
use crate::domain::llm::ChatOptions;

/// Per-prompt call settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_content: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// A named prompt bound to the model that should run it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    name: String,
    model: String,
    messages: Vec<PromptMessage>,
    #[serde(default)]
    config: PromptConfig,
}

impl Prompt {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<PromptMessage>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            messages,
            config: PromptConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PromptConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[PromptMessage] {
        &self.messages
    }

    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// Render every message with `params`, producing messages ready to send
    pub fn finish(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>, TemplateError> {
        self.messages
            .iter()
            .map(|message| {
                let content = PromptTemplate::parse(message.content.as_str()).render(params)?;
                Ok(PromptMessage {
                    content,
                    ..message.clone()
                })
            })
            .collect()
    }

    /// Options derived from the prompt's config
    pub fn options(&self) -> ChatOptions {
        let mut options = ChatOptions::new();
        if let Some(require) = self.config.require_content {
            options = options.with_require_content(require);
        }
        if let Some(temperature) = self.config.temperature {
            options = options.with_temperature(temperature);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prompt::PromptRole;

    #[test]
    fn test_finish_renders_all_messages() {
        let prompt = Prompt::new(
            "Greeting",
            "gpt-4.1",
            vec![
                PromptMessage::system("You greet people in {{language|English}}."),
                PromptMessage::user("Greet {{name}}"),
            ],
        );

        let params = HashMap::from([("name".to_string(), "Ada".to_string())]);
        let messages = prompt.finish(&params).unwrap();

        assert_eq!(messages[0].role, PromptRole::System);
        assert_eq!(messages[0].content, "You greet people in English.");
        assert_eq!(messages[1].content, "Greet Ada");
    }

    #[test]
    fn test_finish_missing_param() {
        let prompt = Prompt::new("P", "m", vec![PromptMessage::user("{{content}}")]);
        assert!(prompt.finish(&HashMap::new()).is_err());
    }

    #[test]
    fn test_options_follow_config() {
        let prompt = Prompt::new("P", "m", vec![]).with_config(PromptConfig {
            require_content: Some(false),
            temperature: None,
        });
        assert!(!prompt.options().requires_content());
        assert!(Prompt::new("P", "m", vec![]).options().requires_content());
    }
}
