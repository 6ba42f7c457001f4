//! Correction and review history commands.

use console::style;

use crate::cli::helpers::{open_store, print_attempt};
use crate::config::Settings;
use crate::pipeline::EventBus;
use crate::repository::AttemptStore;
use crate::review::{parse_corrections, ReviewService};

fn split_assignment(raw: &str) -> anyhow::Result<(&str, &str)> {
    raw.split_once('=')
        .filter(|(name, _)| !name.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Expected NAME=VALUE, got '{}'", raw))
}

/// Apply reviewer corrections to an attempt.
pub async fn cmd_correct(
    settings: &Settings,
    attempt_id: &str,
    reviewer: &str,
    values: &[String],
    notes: Option<String>,
) -> anyhow::Result<()> {
    let pairs = values
        .iter()
        .map(|raw| split_assignment(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let corrections = parse_corrections(pairs)?;

    let store = open_store(settings).await?;
    let reviews = ReviewService::new(store.clone(), EventBus::default());
    let record = reviews
        .submit_correction(attempt_id, corrections, reviewer, notes)
        .await?;

    println!(
        "{} Recorded review {} by {}",
        style("✓").green(),
        record.id,
        record.reviewer_id
    );
    if let Some(attempt) = store.get_attempt(attempt_id).await? {
        print_attempt(&attempt, false)?;
    }
    Ok(())
}

/// List review records of an attempt, oldest first.
pub async fn cmd_history(settings: &Settings, attempt_id: &str, json: bool) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let reviews = ReviewService::new(store, EventBus::default());
    let history = reviews.history(attempt_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }
    if history.is_empty() {
        println!("{} No reviews for attempt {}", style("!").yellow(), attempt_id);
        return Ok(());
    }

    for record in &history {
        println!(
            "\n{} {} by {}",
            style(record.created_at.format("%Y-%m-%d %H:%M:%S").to_string()).bold(),
            record.id,
            record.reviewer_id
        );
        for (name, after) in &record.corrected_data {
            let before = record.original_data.get(name);
            if before == Some(after) {
                continue;
            }
            let before = before
                .map(|b| b.value.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<24} {} {} {}",
                name.to_string(),
                style(before).dim(),
                style("→").cyan(),
                after.value
            );
        }
        if let Some(ref notes) = record.notes {
            println!("  {} {}", style("Notes:").dim(), notes);
        }
    }
    Ok(())
}
