//! LLM status command.

use console::style;

use crate::config::Config;
use crate::llm::LlmClient;

/// Show the configured LLM and whether it answers.
pub async fn cmd_llm(config: &Config) -> anyhow::Result<()> {
    let llm = &config.llm;
    println!("{}", style("LLM").bold());
    println!("{}", "-".repeat(40));
    println!("{:<12} {}", "Provider:", llm.provider_name());
    println!("{:<12} {}", "Endpoint:", llm.endpoint());
    println!("{:<12} {}", "Model:", llm.model());

    if !llm.enabled() {
        println!("{:<12} {}", "Status:", style("disabled").yellow());
        return Ok(());
    }

    let client = LlmClient::new(llm.clone())?;
    if client.is_available().await {
        println!("{:<12} {}", "Status:", style("available").green());
    } else {
        println!("{:<12} {}", "Status:", style("unreachable").red());
        println!("  {} {}", style("→").dim(), llm.availability_hint());
    }
    Ok(())
}
