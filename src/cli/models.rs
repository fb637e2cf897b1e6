//! `models` command - print what the configured providers can serve

use crate::domain::ProviderModel;

use super::{build_factory, init};

fn describe(model: &ProviderModel) -> String {
    let capabilities: Vec<String> = model
        .capabilities
        .iter()
        .map(|c| {
            let join = |items: Vec<String>| items.join("+");
            format!(
                "{} -> {}{}",
                join(c.inputs.iter().map(ToString::to_string).collect()),
                join(c.outputs.iter().map(ToString::to_string).collect()),
                if c.default_for_output { " (default)" } else { "" }
            )
        })
        .collect();
    format!("{}  [{}]", model.id, capabilities.join(", "))
}

pub async fn run() -> anyhow::Result<()> {
    let config = init();
    let factory = build_factory(&config).await?;

    let providers = factory.providers().await;
    if providers.is_empty() {
        println!("No provider is configured.");
        return Ok(());
    }

    for provider in providers {
        println!("{}", provider.provider_type());
        for model in provider.models() {
            println!("  {}", describe(model));
        }
    }
    Ok(())
}
