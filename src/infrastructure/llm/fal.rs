use async_stream::stream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::http_client::HttpClientTrait;
use super::openai_compat::{abortable, vendor_error};
use super::pipeline::prepare_model;
use crate::domain::llm::{
    ChatOptions, CopilotProvider, ImageOptions, ImageStream, InputModality, ModelCapability,
    ModelSelectionQuery, OutputModality, ProviderModel, ProviderType,
};
use crate::domain::prompt::{Attachment, PromptMessage};
use crate::domain::DomainError;
use crate::infrastructure::metrics::{CallMetrics, Operation};

const DEFAULT_FAL_BASE_URL: &str = "https://fal.run/fal-ai";
const DEFAULT_SEED: u64 = 42;

fn default_models() -> Vec<ProviderModel> {
    let image = || ModelCapability::new(&[InputModality::Image], &[OutputModality::Image]);

    let mut models = vec![ProviderModel::new("lcm-sd15-i2i", vec![image().as_default()])];
    models.extend(
        [
            "clarity-upscaler",
            "face-to-sticker",
            "imageutils/rembg",
            "workflowutils/teed",
            "lora/image-to-image",
        ]
        .into_iter()
        .map(|id| ProviderModel::new(id, vec![image()])),
    );
    models
}

/// fal.ai image-to-image models over the synchronous `fal.run` endpoint
#[derive(Debug)]
pub struct FalProvider<C: HttpClientTrait + 'static> {
    client: Arc<C>,
    api_key: String,
    base_url: String,
    models: Vec<ProviderModel>,
}

impl<C: HttpClientTrait + 'static> FalProvider<C> {
    pub fn new(client: Arc<C>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_FAL_BASE_URL)
    }

    pub fn with_base_url(
        client: Arc<C>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models: default_models(),
        }
    }

    async fn run(
        &self,
        model: &str,
        input: FalInput,
        options: &ImageOptions,
    ) -> Result<FalResponse, DomainError> {
        let mut body = serde_json::to_value(input).map_err(|e| DomainError::internal(e.to_string()))?;
        body["sync_mode"] = json!(true);
        body["seed"] = json!(options.seed.unwrap_or(DEFAULT_SEED));
        body["enable_safety_checks"] = json!(false);

        let url = format!("{}/{}", self.base_url, model);
        let auth = format!("key {}", self.api_key);
        let response = abortable(&options.signal, async {
            self.client
                .post_json(
                    &url,
                    vec![("Authorization", auth.as_str()), ("Content-Type", "application/json")],
                    &body,
                )
                .await
                .map_err(|e| vendor_error(ProviderType::Fal, e))
        })
        .await?;

        serde_json::from_value(response).map_err(|e| {
            DomainError::provider_side(
                ProviderType::Fal.as_str(),
                "unexpected_response",
                format!("Unexpected fal response: {}", e),
            )
        })
    }
}

#[async_trait]
impl<C: HttpClientTrait + 'static> CopilotProvider for FalProvider<C> {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Fal
    }

    fn models(&self) -> &[ProviderModel] {
        &self.models
    }

    fn configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn stream_images(
        &self,
        query: &ModelSelectionQuery,
        messages: Vec<PromptMessage>,
        options: ImageOptions,
    ) -> Result<ImageStream, DomainError> {
        // an attachment alone is a valid prompt
        let checks = ChatOptions::new().with_require_content(false);
        let model = prepare_model(self, query, OutputModality::Image, &messages, &checks)?;
        let call = CallMetrics::start(Operation::GenerateImagesStream, ProviderType::Fal, &model.id);

        let input = call.observe(FalInput::from_prompt(messages.last(), &options))?;
        let response = call
            .observe(self.run(&model.id, input, &options).await)
            .inspect_err(|e| error!(model = %model.id, error = %e, "fal image generation failed"))?;
        let urls = call.observe(response.into_urls())?;

        let signal = options.signal.clone();
        Ok(Box::pin(stream! {
            for url in urls {
                yield Ok(url);
                if signal.is_cancelled() {
                    break;
                }
            }
        }))
    }
}

/// Request body for one fal model run; only the last prompt message is used
#[derive(Debug, Default, PartialEq, Serialize)]
struct FalInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    loras: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    controlnets: Vec<Value>,
}

impl FalInput {
    fn from_prompt(
        message: Option<&PromptMessage>,
        options: &ImageOptions,
    ) -> Result<Self, DomainError> {
        let message = message.ok_or_else(|| DomainError::prompt_invalid("Prompt is empty"))?;
        let attachments = message.attachments.as_deref().unwrap_or_default();
        if message.content.is_empty() && attachments.is_empty() {
            return Err(DomainError::prompt_invalid("Prompt or Attachments is empty"));
        }
        if attachments.len() > 1 {
            return Err(DomainError::prompt_invalid("Only one attachment is allowed"));
        }

        let loras = param_list(message, "lora")
            .into_iter()
            .chain(options.loras.iter().cloned())
            .filter(|v| v.get("path").is_some_and(Value::is_string))
            .collect();
        let controlnets = param_list(message, "controlnets")
            .into_iter()
            .filter(|v| v.get("image_url").is_some_and(Value::is_string))
            .collect();

        Ok(Self {
            model_name: options.model_name.clone().filter(|n| !n.is_empty()),
            image_url: attachments.iter().find_map(image_url),
            prompt: message.content.trim().to_string(),
            loras,
            controlnets,
        })
    }
}

/// A bare URL is taken as-is; typed attachments must be images
fn image_url(attachment: &Attachment) -> Option<String> {
    match attachment {
        Attachment::Url(url) => Some(url.clone()),
        Attachment::Typed {
            attachment,
            mime_type,
        } if mime_type.starts_with("image/") => Some(attachment.clone()),
        Attachment::Typed { .. } => None,
    }
}

/// A message param that may hold one value or a list of them
fn param_list(message: &PromptMessage, key: &str) -> Vec<Value> {
    match message.params.as_ref().and_then(|p| p.get(key)) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(value) => vec![value.clone()],
    }
}

#[derive(Debug, Deserialize)]
struct FalResponse {
    detail: Option<FalDetail>,
    #[serde(default)]
    images: Option<Vec<Option<FalImage>>>,
    image: Option<FalImage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FalDetail {
    Issues(Vec<FalIssue>),
    Message(String),
}

#[derive(Debug, Deserialize)]
struct FalIssue {
    #[serde(rename = "type")]
    kind: String,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct FalImage {
    url: String,
}

impl FalResponse {
    /// A single `image` wins over the `images` list
    fn into_urls(self) -> Result<Vec<String>, DomainError> {
        if let Some(image) = self.image {
            return Ok(vec![image.url]);
        }

        let urls: Vec<String> = self
            .images
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .map(|image| image.url)
            .collect();
        if !urls.is_empty() {
            return Ok(urls);
        }

        let (kind, message) = match self.detail {
            Some(FalDetail::Issues(issues)) if !issues.is_empty() => {
                let first = &issues[0];
                (first.kind.clone(), format!("Failed to generate images: {}", first.msg))
            }
            Some(FalDetail::Message(detail)) => {
                (detail.clone(), format!("Failed to generate images: {}", detail))
            }
            _ => ("unknown".to_string(), "No content generated".to_string()),
        };
        Err(DomainError::provider_side(ProviderType::Fal.as_str(), kind, message))
    }
}
