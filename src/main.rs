use clap::Parser;
use copilot_gateway::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Models => cli::models::run().await,
        Command::Chat(args) => cli::chat::run(args).await,
    }
}
