//! Shape checks on prompt messages and embedding input

use super::{PromptMessage, PromptRole};
use crate::domain::llm::{ChatOptions, ProviderModel};
use crate::domain::DomainError;

struct Issues(Vec<String>);

impl Issues {
    fn push(&mut self, path: String, message: &str) {
        self.0.push(format!("{}: {}", path, message));
    }

    fn into_result(self) -> Result<(), DomainError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(DomainError::prompt_invalid(self.0.join("; ")))
        }
    }
}

/// Validate messages for a chat call against the chosen model.
///
/// Every failing field is reported, not just the first one.
pub fn check_params(
    model: &ProviderModel,
    messages: &[PromptMessage],
    options: &ChatOptions,
) -> Result<(), DomainError> {
    let mut issues = Issues(Vec::new());
    let need_attachment = options.requires_attachment() && model.is_multimodal();

    for (i, message) in messages.iter().enumerate() {
        if i > 0 && message.role == PromptRole::System {
            issues.push(
                format!("root[{}].role", i),
                "only the first message may be a system message",
            );
        }

        if options.requires_content() && message.content.trim().is_empty() {
            issues.push(
                format!("root[{}].content", i),
                "String must contain at least 1 character(s)",
            );
        }

        if need_attachment && message.role == PromptRole::User && message.attachment_count() == 0 {
            issues.push(
                format!("root[{}].attachments", i),
                "Array must contain at least 1 element(s)",
            );
        }
    }

    issues.into_result()
}

/// Embedding input must be a non-empty list of non-blank strings
pub fn check_embedding_input(inputs: &[String]) -> Result<(), DomainError> {
    let mut issues = Issues(Vec::new());

    if inputs.is_empty() {
        issues.push("root".to_string(), "Array must contain at least 1 element(s)");
    }

    for (i, input) in inputs.iter().enumerate() {
        if input.trim().is_empty() {
            issues.push(
                format!("root[{}]", i),
                "String must contain at least 1 character(s)",
            );
        }
    }

    issues.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::{InputModality, ModelCapability, OutputModality};
    use crate::domain::prompt::Attachment;

    fn vision_model() -> ProviderModel {
        ProviderModel::new(
            "gpt-4.1",
            vec![ModelCapability::new(
                &[InputModality::Text, InputModality::Image],
                &[OutputModality::Text],
            )],
        )
    }

    fn text_model() -> ProviderModel {
        ProviderModel::new(
            "morph-v3-fast",
            vec![ModelCapability::new(&[InputModality::Text], &[OutputModality::Text])],
        )
    }

    #[test]
    fn test_valid_messages() {
        let messages = vec![PromptMessage::system("be nice"), PromptMessage::user("hi")];
        assert!(check_params(&text_model(), &messages, &ChatOptions::new()).is_ok());
    }

    #[test]
    fn test_every_failure_is_listed() {
        let messages = vec![
            PromptMessage::user("  "),
            PromptMessage::system("late system"),
            PromptMessage::assistant(""),
        ];

        let error = check_params(&text_model(), &messages, &ChatOptions::new()).unwrap_err();
        assert_eq!(
            error,
            DomainError::prompt_invalid(
                "root[0].content: String must contain at least 1 character(s); \
                 root[1].role: only the first message may be a system message; \
                 root[2].content: String must contain at least 1 character(s)"
            )
        );
    }

    #[test]
    fn test_content_not_required_when_disabled() {
        let messages = vec![PromptMessage::user("")];
        let options = ChatOptions::new().with_require_content(false);
        assert!(check_params(&text_model(), &messages, &options).is_ok());
    }

    #[test]
    fn test_attachment_required_only_for_multimodal_models() {
        let messages = vec![PromptMessage::user("describe")];
        let options = ChatOptions::new().with_require_attachment(true);

        let error = check_params(&vision_model(), &messages, &options).unwrap_err();
        assert!(error.to_string().contains("root[0].attachments"));

        assert!(check_params(&text_model(), &messages, &options).is_ok());

        let with_image = vec![
            PromptMessage::user("describe")
                .with_attachments(vec![Attachment::from("https://a.test/cat.png")]),
        ];
        assert!(check_params(&vision_model(), &with_image, &options).is_ok());
    }

    #[test]
    fn test_embedding_input() {
        assert!(check_embedding_input(&["a".to_string()]).is_ok());

        let error = check_embedding_input(&[]).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Prompt invalid: root: Array must contain at least 1 element(s)"
        );

        let error = check_embedding_input(&["ok".to_string(), " ".to_string()]).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Prompt invalid: root[1]: String must contain at least 1 character(s)"
        );
    }
}
