//! Status command.

use console::style;

use crate::cli::helpers::{open_store, print_attempt};
use crate::config::Settings;
use crate::models::AttemptRecord;
use crate::repository::AttemptStore;

/// Show the latest (or every) attempt of a document.
pub async fn cmd_status(
    settings: &Settings,
    document_id: &str,
    all: bool,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(settings).await?;

    let Some(document) = store.get_document(document_id).await? else {
        println!("{} Document not found: {}", style("!").yellow(), document_id);
        return Ok(());
    };

    let attempts = if all {
        store.attempts_for(document_id).await?
    } else {
        store.latest_attempt(document_id).await?.into_iter().collect()
    };

    if json {
        let records: Vec<AttemptRecord> = attempts.iter().map(AttemptRecord::from).collect();
        let output = if all {
            serde_json::to_string_pretty(&records)?
        } else {
            serde_json::to_string_pretty(&records.first())?
        };
        println!("{}", output);
        return Ok(());
    }

    println!(
        "{} {} ({}, {})",
        style("Document").bold(),
        document.id,
        document.file_name,
        document.category.as_str()
    );
    if let Some(ref farm) = document.farm_id {
        println!("  Farm: {}", farm);
    }
    if attempts.is_empty() {
        println!("{} No extraction attempts yet", style("!").yellow());
    }
    for attempt in &attempts {
        print_attempt(attempt, false)?;
    }
    Ok(())
}
