//! Model capability declarations and model selection

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Data kind a model can accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
    Audio,
}

/// Kind of result a model can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputModality {
    Text,
    Object,
    Structured,
    Image,
    Embedding,
}

impl fmt::Display for InputModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
        };
        f.write_str(name)
    }
}

impl fmt::Display for OutputModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Object => "object",
            Self::Structured => "structured",
            Self::Image => "image",
            Self::Embedding => "embedding",
        };
        f.write_str(name)
    }
}

/// One accepted-inputs x produced-outputs pairing for a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCapability {
    pub inputs: Vec<InputModality>,
    pub outputs: Vec<OutputModality>,
    pub default_for_output: bool,
}

impl ModelCapability {
    pub fn new(inputs: &[InputModality], outputs: &[OutputModality]) -> Self {
        Self {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            default_for_output: false,
        }
    }

    /// Mark this capability as the provider default for its outputs.
    pub fn as_default(mut self) -> Self {
        self.default_for_output = true;
        self
    }

    /// Every requested input must be accepted, not just some of them.
    pub fn satisfies(&self, output: Option<OutputModality>, inputs: &[InputModality]) -> bool {
        let output_ok = output.is_none_or(|o| self.outputs.contains(&o));
        let inputs_ok = inputs.iter().all(|i| self.inputs.contains(i));
        output_ok && inputs_ok
    }
}

/// A model owned by exactly one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderModel {
    pub id: String,
    pub capabilities: Vec<ModelCapability>,
}

impl ProviderModel {
    pub fn new(id: impl Into<String>, capabilities: Vec<ModelCapability>) -> Self {
        Self {
            id: id.into(),
            capabilities,
        }
    }

    pub fn supports(&self, output: Option<OutputModality>, inputs: &[InputModality]) -> bool {
        self.capabilities.iter().any(|c| c.satisfies(output, inputs))
    }

    /// A model is multimodal when any capability takes image or audio input.
    pub fn is_multimodal(&self) -> bool {
        self.capabilities.iter().any(|c| {
            c.inputs
                .iter()
                .any(|i| matches!(i, InputModality::Image | InputModality::Audio))
        })
    }
}

/// Per-call model selection constraints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSelectionQuery {
    pub model_id: Option<String>,
    pub output_type: Option<OutputModality>,
    pub input_types: Vec<InputModality>,
}

impl ModelSelectionQuery {
    pub fn model(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            ..Default::default()
        }
    }

    pub fn output(output_type: OutputModality) -> Self {
        Self {
            output_type: Some(output_type),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_output(mut self, output_type: OutputModality) -> Self {
        self.output_type = Some(output_type);
        self
    }

    pub fn with_inputs(mut self, input_types: &[InputModality]) -> Self {
        self.input_types = input_types.to_vec();
        self
    }

    fn describe_output(&self) -> String {
        self.output_type
            .map(|o| o.to_string())
            .unwrap_or_else(|| "<any>".to_string())
    }

    fn describe_inputs(&self) -> String {
        if self.input_types.is_empty() {
            "<any>".to_string()
        } else {
            self.input_types
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// Find the model satisfying a query.
///
/// With a model id the exact model must have a matching capability. Without
/// one, the output type is mandatory and the model holding the default
/// capability for it wins.
pub fn find_valid_model<'a>(
    models: &'a [ProviderModel],
    query: &ModelSelectionQuery,
) -> Option<&'a ProviderModel> {
    let inputs = query.input_types.as_slice();

    if let Some(model_id) = &query.model_id {
        return models
            .iter()
            .find(|m| &m.id == model_id && m.supports(query.output_type, inputs));
    }

    let output = query.output_type?;

    models.iter().find(|m| {
        m.capabilities
            .iter()
            .any(|c| c.default_for_output && c.satisfies(Some(output), inputs))
    })
}

/// Like [`find_valid_model`], but names the unmet constraint on failure.
pub fn select_model<'a>(
    provider: &str,
    models: &'a [ProviderModel],
    query: &ModelSelectionQuery,
) -> Result<&'a ProviderModel, DomainError> {
    if let Some(model) = find_valid_model(models, query) {
        return Ok(model);
    }

    let message = match (&query.model_id, query.output_type) {
        (Some(model_id), _) => format!(
            "Model {} does not support {} output with {} input",
            model_id,
            query.describe_output(),
            query.describe_inputs()
        ),
        (None, Some(_)) => format!(
            "No model supports {} output with {} input for provider {}",
            query.describe_output(),
            query.describe_inputs(),
            provider
        ),
        (None, None) => "Output type is required when modelId is not provided".to_string(),
    };

    Err(DomainError::prompt_invalid(message))
}
