//! CLI for the copilot gateway
//!
//! - `models`: list configured providers and their models
//! - `chat`: stream one completion to stdout

pub mod chat;
pub mod models;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{AppConfig, ProviderEntry};
use crate::domain::prompt::InMemoryPromptCatalog;
use crate::domain::CopilotProvider;
use crate::infrastructure::llm::{
    AnthropicProvider, DeepSeekProvider, FactoryTextRouter, FalProvider, GeminiProvider,
    HttpClient, MorphProvider, OpenAiProvider, PerplexityProvider, ProviderFactory,
};
use crate::infrastructure::{logging, metrics};
use crate::infrastructure::tools::{ExaClient, ToolSetBuilder};

/// Copilot gateway - one provider contract over several model vendors
#[derive(Parser)]
#[command(name = "copilot-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List configured providers with their models and capabilities
    Models,

    /// Stream a completion for one prompt
    Chat(chat::ChatArgs),
}

/// Load configuration, start logging and the metrics exporter
pub fn init() -> AppConfig {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);
    metrics::init_metrics(&config.metrics);
    config
}

fn key(entry: &ProviderEntry) -> String {
    entry.api_key().unwrap_or_default().to_string()
}

/// Build the provider factory from configuration.
///
/// Providers without a key are reconciled away, so only usable vendors
/// end up registered.
pub async fn build_factory(config: &AppConfig) -> anyhow::Result<Arc<ProviderFactory>> {
    let http = Arc::new(HttpClient::with_timeout(Duration::from_secs(
        config.http.timeout_secs,
    ))?);
    let factory = Arc::new(ProviderFactory::new());

    let mut tools = ToolSetBuilder::new()
        .with_prompts(Arc::new(InMemoryPromptCatalog::with_builtin()))
        .with_router(Arc::new(FactoryTextRouter::new(&factory)));
    if let Some(exa_key) = config.exa.api_key() {
        tools = tools.with_web(Arc::new(ExaClient::new(http.clone(), exa_key)));
    }
    let tools = Arc::new(tools);

    let providers = &config.providers;
    let openai = match &providers.openai.base_url {
        Some(url) => OpenAiProvider::with_base_url(http.clone(), key(&providers.openai), url),
        None => OpenAiProvider::new(http.clone(), key(&providers.openai)),
    };
    let anthropic = match &providers.anthropic.base_url {
        Some(url) => {
            AnthropicProvider::with_base_url(http.clone(), key(&providers.anthropic), url)
        }
        None => AnthropicProvider::new(http.clone(), key(&providers.anthropic)),
    };
    let perplexity = match &providers.perplexity.base_url {
        Some(url) => {
            PerplexityProvider::with_base_url(http.clone(), key(&providers.perplexity), url)
        }
        None => PerplexityProvider::new(http.clone(), key(&providers.perplexity)),
    };
    let morph = match &providers.morph.base_url {
        Some(url) => MorphProvider::with_base_url(http.clone(), key(&providers.morph), url),
        None => MorphProvider::new(http.clone(), key(&providers.morph)),
    };
    let deepseek = match &providers.deepseek.base_url {
        Some(url) => DeepSeekProvider::with_base_url(http.clone(), key(&providers.deepseek), url),
        None => DeepSeekProvider::new(http.clone(), key(&providers.deepseek)),
    };
    let gemini = match &providers.gemini.base_url {
        Some(url) => GeminiProvider::with_base_url(http.clone(), key(&providers.gemini), url),
        None => GeminiProvider::new(http.clone(), key(&providers.gemini)),
    };
    let fal = match &providers.fal.base_url {
        Some(url) => FalProvider::with_base_url(http.clone(), key(&providers.fal), url),
        None => FalProvider::new(http.clone(), key(&providers.fal)),
    };

    let all: [Arc<dyn CopilotProvider>; 7] = [
        Arc::new(openai.with_tools(tools.clone())),
        Arc::new(anthropic.with_tools(tools.clone())),
        Arc::new(gemini.with_tools(tools)),
        Arc::new(perplexity),
        Arc::new(morph),
        Arc::new(deepseek),
        Arc::new(fal),
    ];
    for provider in all {
        factory.reconcile(provider).await;
    }

    if !factory.is_enabled() {
        info!("No provider has an API key; set APP__PROVIDERS__<NAME>__API_KEY");
    }
    Ok(factory)
}
