//! Per-call Prometheus counters for the provider adapters

use std::net::SocketAddr;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

use crate::config::MetricsConfig;
use crate::domain::llm::ProviderType;
use crate::domain::DomainError;

/// Adapter operations that are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `text` and `structure`
    ChatText,
    ChatTextStream,
    ChatObjectStream,
    GenerateImagesStream,
    GenerateEmbedding,
    Rerank,
}

impl Operation {
    pub fn calls(&self) -> &'static str {
        match self {
            Self::ChatText => "ai_chat_text_calls",
            Self::ChatTextStream => "ai_chat_text_stream_calls",
            Self::ChatObjectStream => "ai_chat_object_stream_calls",
            Self::GenerateImagesStream => "ai_generate_images_stream_calls",
            Self::GenerateEmbedding => "ai_generate_embedding_calls",
            Self::Rerank => "ai_rerank_calls",
        }
    }

    pub fn errors(&self) -> &'static str {
        match self {
            Self::ChatText => "ai_chat_text_errors",
            Self::ChatTextStream => "ai_chat_text_stream_errors",
            Self::ChatObjectStream => "ai_chat_object_stream_errors",
            Self::GenerateImagesStream => "ai_generate_images_stream_errors",
            Self::GenerateEmbedding => "ai_generate_embedding_errors",
            Self::Rerank => "ai_rerank_errors",
        }
    }
}

/// One counted call. Created once the model is known; errors are counted
/// whether they surface from the call itself or from the stream it returns.
/// Cancellation is not an error.
#[derive(Debug, Clone)]
pub struct CallMetrics {
    operation: Operation,
    provider: ProviderType,
    model: String,
}

impl CallMetrics {
    pub fn start(operation: Operation, provider: ProviderType, model: &str) -> Self {
        let call = Self {
            operation,
            provider,
            model: model.to_string(),
        };
        counter!(
            operation.calls(),
            "provider" => provider.as_str(),
            "model" => call.model.clone()
        )
        .increment(1);
        call
    }

    fn record_error(&self, error: &DomainError) {
        if error.is_aborted() {
            return;
        }
        counter!(
            self.operation.errors(),
            "provider" => self.provider.as_str(),
            "model" => self.model.clone()
        )
        .increment(1);
    }

    pub fn observe<T>(&self, result: Result<T, DomainError>) -> Result<T, DomainError> {
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    pub fn observe_stream<T: Send + 'static>(
        self,
        stream: Pin<Box<dyn Stream<Item = Result<T, DomainError>> + Send>>,
    ) -> Pin<Box<dyn Stream<Item = Result<T, DomainError>> + Send>> {
        Box::pin(stream.inspect(move |item| {
            if let Err(e) = item {
                self.record_error(e);
            }
        }))
    }
}

/// Install the Prometheus recorder with its scrape listener
pub fn init_metrics(config: &MetricsConfig) {
    if !config.enabled {
        info!("Prometheus metrics disabled");
        return;
    }

    let addr: SocketAddr = match config.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %config.listen, error = %e, "Invalid metrics listen address");
            return;
        }
    };

    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            gauge!("copilot_gateway_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            info!(listen = %addr, "Prometheus metrics initialized");
        }
        Err(e) => error!(error = %e, "Failed to initialize Prometheus metrics"),
    }
}
