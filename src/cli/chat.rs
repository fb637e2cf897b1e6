//! `chat` command - stream one completion to stdout

use std::io::Write;

use anyhow::{anyhow, Context};
use clap::{Args, ValueEnum};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::{
    ChatOptions, ModelSelectionQuery, OutputModality, PromptMessage, ProviderType, ToolKind,
};

use super::{build_factory, init};

/// Tools a CLI user may expose to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ToolArg {
    WebSearch,
    CodeArtifact,
    DocCompose,
    ConversationSummary,
}

impl From<ToolArg> for ToolKind {
    fn from(tool: ToolArg) -> Self {
        match tool {
            ToolArg::WebSearch => ToolKind::WebSearch,
            ToolArg::CodeArtifact => ToolKind::CodeArtifact,
            ToolArg::DocCompose => ToolKind::DocCompose,
            ToolArg::ConversationSummary => ToolKind::ConversationSummary,
        }
    }
}

/// Arguments for the chat command
#[derive(Args, Clone, Debug)]
pub struct ChatArgs {
    /// User message to send
    #[arg(long)]
    pub prompt: String,

    /// Optional system message
    #[arg(long)]
    pub system: Option<String>,

    /// Model id; the default text model is used when omitted
    #[arg(long)]
    pub model: Option<String>,

    /// Restrict selection to one provider (openai, anthropic, perplexity, morph)
    #[arg(long)]
    pub provider: Option<String>,

    /// Ask reasoning-capable models to think first
    #[arg(long)]
    pub reasoning: bool,

    /// Tools the model may call; repeatable
    #[arg(long = "tool", value_enum)]
    pub tools: Vec<ToolArg>,
}

impl ChatArgs {
    fn query(&self) -> ModelSelectionQuery {
        let query = ModelSelectionQuery::output(OutputModality::Text);
        match &self.model {
            Some(model) => query.with_model(model),
            None => query,
        }
    }

    fn messages(&self) -> Vec<PromptMessage> {
        self.system
            .iter()
            .map(PromptMessage::system)
            .chain(std::iter::once(PromptMessage::user(&self.prompt)))
            .collect()
    }

    fn options(&self, signal: CancellationToken) -> ChatOptions {
        ChatOptions::new()
            .with_signal(signal)
            .with_reasoning(self.reasoning)
            .with_tools(self.tools.iter().copied().map(ToolKind::from).collect())
    }
}

pub async fn run(args: ChatArgs) -> anyhow::Result<()> {
    let config = init();
    let factory = build_factory(&config).await?;

    let prefer = args
        .provider
        .as_deref()
        .map(str::parse::<ProviderType>)
        .transpose()?;
    let query = args.query();
    let provider = factory
        .get_provider(&query, prefer)
        .await
        .ok_or_else(|| anyhow!("No configured provider serves this request"))?;
    info!(provider = %provider.provider_type(), model = ?query.model_id, "Starting chat");

    let signal = CancellationToken::new();
    let cancel = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Ctrl-C received, cancelling stream");
            cancel.cancel();
        }
    });

    let mut stream = provider
        .stream_text(&query, args.messages(), args.options(signal.clone()))
        .await
        .context("Failed to start the completion")?;

    let mut stdout = std::io::stdout().lock();
    while let Some(delta) = stream.next().await {
        write!(stdout, "{}", delta?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    if signal.is_cancelled() {
        info!("Chat cancelled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ChatArgs,
    }

    #[test]
    fn test_parse_chat_args() {
        let harness = Harness::parse_from([
            "chat",
            "--prompt",
            "hello",
            "--model",
            "sonar",
            "--tool",
            "web-search",
            "--tool",
            "code-artifact",
            "--reasoning",
        ]);
        let args = harness.args;

        assert_eq!(args.query(), ModelSelectionQuery::output(OutputModality::Text).with_model("sonar"));
        assert!(args.reasoning);

        let options = args.options(CancellationToken::new());
        assert_eq!(options.tools, vec![ToolKind::WebSearch, ToolKind::CodeArtifact]);
        assert!(options.reasoning);
    }

    #[test]
    fn test_messages_with_system() {
        let harness = Harness::parse_from(["chat", "--prompt", "hi", "--system", "be terse"]);
        let messages = harness.args.messages();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], PromptMessage::system("be terse"));
        assert_eq!(messages[1], PromptMessage::user("hi"));
    }
}
