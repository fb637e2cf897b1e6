use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// An attachment is either a bare URL or a URL with an explicit MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attachment {
    Url(String),
    Typed {
        attachment: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl Attachment {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Typed { attachment, .. } => attachment,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Url(_) => None,
            Self::Typed { mime_type, .. } => Some(mime_type),
        }
    }
}

impl From<&str> for Attachment {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

/// A role-tagged message as handed in by the calling application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: None,
            params: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(PromptRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(PromptRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(PromptRole::Assistant, content)
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = Some(attachments);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Attach a JSON schema for structured output (system messages only)
    pub fn with_schema(self, schema: Value) -> Self {
        self.with_param("schema", schema)
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.as_ref().map_or(0, Vec::len)
    }

    /// Structured-output schema, when carried as a JSON object
    pub fn schema(&self) -> Option<&Value> {
        self.params
            .as_ref()
            .and_then(|p| p.get("schema"))
            .filter(|s| s.is_object())
    }

    /// Caller-supplied MIME type for bare URL attachments
    pub fn mime_hint(&self) -> Option<&str> {
        self.params
            .as_ref()
            .and_then(|p| p.get("mimetype"))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attachment_forms_deserialize() {
        let message: PromptMessage = serde_json::from_value(json!({
            "role": "user",
            "content": "look",
            "attachments": [
                "https://a.test/cat.png",
                {"attachment": "https://a.test/doc", "mimeType": "application/pdf"}
            ]
        }))
        .unwrap();

        let attachments = message.attachments.unwrap();
        assert_eq!(attachments[0], Attachment::Url("https://a.test/cat.png".into()));
        assert_eq!(attachments[1].url(), "https://a.test/doc");
        assert_eq!(attachments[1].mime_type(), Some("application/pdf"));
    }

    #[test]
    fn test_schema_must_be_object() {
        let message = PromptMessage::system("s").with_schema(json!("not a schema"));
        assert!(message.schema().is_none());

        let message = PromptMessage::system("s").with_schema(json!({"type": "object"}));
        assert_eq!(message.schema(), Some(&json!({"type": "object"})));
    }

    #[test]
    fn test_mime_hint() {
        let message = PromptMessage::user("x").with_param("mimetype", json!("image/png"));
        assert_eq!(message.mime_hint(), Some("image/png"));
        assert_eq!(PromptMessage::user("x").mime_hint(), None);
    }
}
