//! Converts prompt messages into the backend-neutral request form

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::http_client::HttpClientTrait;
use crate::domain::llm::{ChatMessage, ContentPart, MediaSource, MessageRole};
use crate::domain::prompt::{Attachment, PromptMessage, PromptRole};
use crate::domain::DomainError;

/// Placeholder for empty turns on vendors that reject them
pub const EMPTY_CONTENT_PLACEHOLDER: &str = "[no content]";

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

static SIMPLE_URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https?://|data:image/)").unwrap());

fn mime_from_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "opus" => "audio/opus",
        "ogg" => "audio/ogg",
        "aac" | "m4a" => "audio/aac",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "ogv" => "video/ogg",
        "mov" => "video/mov",
        "mpeg" => "video/mpeg",
        "mp4" => "video/mp4",
        "avi" => "video/avi",
        "wmv" => "video/wmv",
        "flv" => "video/flv",
        "png" => "image/png",
        "jpeg" | "jpg" => "image/jpeg",
        "webp" => "image/webp",
        "txt" | "md" => "text/plain",
        _ => return None,
    };
    Some(mime)
}

/// Work out an attachment's MIME type: data URL prefix, then file
/// extension, then a HEAD request, then `application/octet-stream`.
pub async fn infer_mime_type(http: &dyn HttpClientTrait, url: &str) -> String {
    if let Some(rest) = url.strip_prefix("data:") {
        let mime = rest.split([';', ',']).next().unwrap_or_default();
        return if mime.is_empty() {
            FALLBACK_MIME_TYPE.to_string()
        } else {
            mime.to_string()
        };
    }

    let Ok(parsed) = reqwest::Url::parse(url) else {
        return FALLBACK_MIME_TYPE.to_string();
    };

    let extension = parsed
        .path()
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && !ext.contains('/'));

    if let Some(ext) = extension {
        if let Some(mime) = mime_from_extension(ext) {
            return mime.to_string();
        }
        if let Some(mime) = mime_guess::from_ext(ext).first_raw() {
            return mime.to_string();
        }
    }

    match http.head_content_type(url).await {
        Ok(Some(mime)) => mime,
        Ok(None) => FALLBACK_MIME_TYPE.to_string(),
        Err(e) => {
            debug!(url = %url, error = %e, "HEAD request for attachment type failed");
            FALLBACK_MIME_TYPE.to_string()
        }
    }
}

/// Options controlling attachment handling
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Include attachments at all
    pub with_attachment: bool,
    /// Inline every attachment as base64 instead of passing URLs
    pub use_base64: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            with_attachment: true,
            use_base64: false,
        }
    }
}

/// Request parts produced by [`RequestNormalizer::normalize`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedPrompt {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Structured-output schema carried by the system message
    pub schema: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RequestNormalizer {
    http: Arc<dyn HttpClientTrait>,
}

impl RequestNormalizer {
    pub fn new(http: Arc<dyn HttpClientTrait>) -> Self {
        Self { http }
    }

    pub async fn normalize(
        &self,
        mut messages: Vec<PromptMessage>,
        options: NormalizeOptions,
    ) -> Result<NormalizedPrompt, DomainError> {
        let system = match messages.first() {
            Some(first) if first.role == PromptRole::System => Some(messages.remove(0)),
            _ => None,
        };
        let schema = system.as_ref().and_then(|s| s.schema().cloned());

        let mut normalized = Vec::with_capacity(messages.len());
        for message in messages.into_iter().filter(|m| m.role != PromptRole::System) {
            normalized.push(self.convert(message, options).await?);
        }

        Ok(NormalizedPrompt {
            system: system.map(|s| s.content),
            messages: normalized,
            schema,
        })
    }

    async fn convert(
        &self,
        message: PromptMessage,
        options: NormalizeOptions,
    ) -> Result<ChatMessage, DomainError> {
        let role = match message.role {
            PromptRole::Assistant => MessageRole::Assistant,
            _ => MessageRole::User,
        };
        let content = message.content.trim();

        let Some(attachments) = &message.attachments else {
            return Ok(ChatMessage::new(role, vec![ContentPart::text(content)]));
        };

        let mut parts = Vec::new();
        if !content.is_empty() {
            parts.push(ContentPart::text(content));
        }

        if options.with_attachment {
            for attachment in attachments {
                if let Some(part) = self
                    .attachment_part(attachment, message.mime_hint(), options.use_base64)
                    .await?
                {
                    parts.push(part);
                }
            }
        } else if content.is_empty() {
            parts.push(ContentPart::text(EMPTY_CONTENT_PLACEHOLDER));
        }

        Ok(ChatMessage::new(role, parts))
    }

    async fn attachment_part(
        &self,
        attachment: &Attachment,
        hint: Option<&str>,
        use_base64: bool,
    ) -> Result<Option<ContentPart>, DomainError> {
        let url = attachment.url();
        if !SIMPLE_URL_PATTERN.is_match(url) {
            debug!(url = %url, "Skipping attachment with unsupported scheme");
            return Ok(None);
        }

        let mime_type = match (attachment.mime_type(), hint) {
            (Some(mime), _) | (None, Some(mime)) => mime.to_string(),
            (None, None) => infer_mime_type(self.http.as_ref(), url).await,
        };

        let source = if url.starts_with("data:") {
            MediaSource::Base64(decode_data_url(url)?)
        } else if use_base64 {
            let bytes = self.http.get_bytes(url).await?;
            MediaSource::Base64(BASE64.encode(&bytes))
        } else {
            MediaSource::Url(url.to_string())
        };

        let part = if mime_type.starts_with("image/") {
            ContentPart::Image { source, mime_type }
        } else {
            ContentPart::File { source, mime_type }
        };
        Ok(Some(part))
    }
}

/// Base64 payload of a data URL
fn decode_data_url(url: &str) -> Result<String, DomainError> {
    let (meta, payload) = url
        .split_once(',')
        .ok_or_else(|| DomainError::prompt_invalid(format!("Malformed data URL: {:.40}", url)))?;

    if meta.ends_with(";base64") {
        return Ok(payload.to_string());
    }

    let decoded = urlencoding::decode_binary(payload.as_bytes());
    Ok(BASE64.encode(decoded))
}
