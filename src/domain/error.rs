use thiserror::Error;

/// Core domain errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DomainError {
    #[error("Prompt invalid: {message}")]
    PromptInvalid { message: String },

    #[error("Provider {provider} failed ({kind}): {message}")]
    ProviderSide {
        provider: String,
        kind: String,
        message: String,
    },

    #[error("Provider {provider} does not support {kind}")]
    ProviderNotSupported { provider: String, kind: String },

    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("HTTP error{}: {message}", status_suffix(.status))]
    Http { status: Option<u16>, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Request aborted")]
    Aborted,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" {}", s)).unwrap_or_default()
}

impl DomainError {
    pub fn prompt_invalid(message: impl Into<String>) -> Self {
        Self::PromptInvalid {
            message: message.into(),
        }
    }

    pub fn provider_side(
        provider: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderSide {
            provider: provider.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn not_supported(provider: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::ProviderNotSupported {
            provider: provider.into(),
            kind: kind.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attribute a lower-level failure to a vendor.
    ///
    /// Transport errors carry their status as the kind; errors that already
    /// name a provider are left untouched.
    pub fn for_provider(self, provider: &str) -> Self {
        match self {
            Self::Http { status, message } => Self::ProviderSide {
                provider: provider.to_string(),
                kind: status
                    .map(|s| format!("http_{}", s))
                    .unwrap_or_else(|| "transport".to_string()),
                message,
            },
            Self::Stream { message } => Self::ProviderSide {
                provider: provider.to_string(),
                kind: "stream".to_string(),
                message,
            },
            other => other,
        }
    }

    pub fn is_prompt_invalid(&self) -> bool {
        matches!(self, Self::PromptInvalid { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<crate::domain::prompt::TemplateError> for DomainError {
    fn from(error: crate::domain::prompt::TemplateError) -> Self {
        Self::prompt_invalid(error.to_string())
    }
}
