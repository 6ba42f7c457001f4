//! Shared helper functions for CLI commands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::config::{Config, ExtractionPolicy, Settings};
use crate::extract::{FileTextExtractor, LlmFieldModel};
use crate::llm::LlmClient;
use crate::models::{AttemptRecord, AttemptStatus, DocumentFormat, ExtractionAttempt};
use crate::pipeline::{ExtractionEvent, ExtractionService};
use crate::repository::{run_migrations, DieselAttemptStore};

/// Open the SQLite store, creating and migrating the database as needed.
pub async fn open_store(settings: &Settings) -> anyhow::Result<Arc<DieselAttemptStore>> {
    settings.ensure_directories()?;
    run_migrations(&settings.database_url()).await?;
    Ok(Arc::new(settings.create_store()?))
}

/// Build the extraction service with the configured text adapter and,
/// when reachable, the configured LLM.
pub async fn build_service(
    settings: &Settings,
    config: &Config,
    policy: ExtractionPolicy,
) -> anyhow::Result<ExtractionService> {
    let store = open_store(settings).await?;
    let text = FileTextExtractor::new().with_language(config.extraction.ocr_language());
    let service = ExtractionService::new(store, Arc::new(text), policy);

    if !config.llm.enabled() {
        return Ok(service);
    }
    let client = match LlmClient::new(config.llm.clone()) {
        Ok(client) => client,
        Err(e) => {
            warn!("LLM client unavailable: {}", e);
            return Ok(service);
        }
    };
    if !client.is_available().await {
        warn!(
            "LLM not reachable; running rule extraction only. {}",
            config.llm.availability_hint()
        );
        return Ok(service);
    }
    Ok(service.with_ai_model(Arc::new(LlmFieldModel::new(client))))
}

/// Detect the MIME type of a file from its content, then its extension.
pub fn detect_mime(path: &Path) -> anyhow::Result<String> {
    if let Some(kind) = infer::get_from_path(path)? {
        if DocumentFormat::from_mime(kind.mime_type()).is_some() {
            return Ok(kind.mime_type().to_string());
        }
    }
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(DocumentFormat::from_extension)
        .map(|f| f.mime_type().to_string())
        .ok_or_else(|| anyhow::anyhow!("Cannot determine file type of {}", path.display()))
}

/// Show a spinner driven by pipeline events until the attempt is terminal.
///
/// Events are advisory, so the store is polled as well in case the
/// receiver lagged past the terminal event.
pub async fn follow_attempt(
    service: &ExtractionService,
    mut events: broadcast::Receiver<ExtractionEvent>,
    attempt_id: &str,
) -> anyhow::Result<ExtractionAttempt> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("  {spinner:.cyan} {wide_msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Queued");

    loop {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Ok(event)) if event.attempt_id() == attempt_id => {
                if let ExtractionEvent::Progress {
                    stage,
                    progress_percent,
                    ..
                } = &event
                {
                    pb.set_message(format!("{} ({}%)", stage, progress_percent));
                }
                if event.is_terminal() {
                    break;
                }
            }
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => {
                let done = service
                    .attempt(attempt_id)
                    .await?
                    .is_some_and(|a| a.status.is_terminal());
                if done {
                    break;
                }
            }
        }
    }
    pb.finish_and_clear();

    service
        .attempt(attempt_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Attempt {} not found", attempt_id))
}

fn status_label(status: AttemptStatus) -> String {
    match status {
        AttemptStatus::Completed => style(status.as_str()).green().to_string(),
        AttemptStatus::Reviewed => style(status.as_str()).cyan().to_string(),
        AttemptStatus::Failed => style(status.as_str()).red().to_string(),
        _ => style(status.as_str()).yellow().to_string(),
    }
}

/// Print an attempt either as JSON or as a field table.
pub fn print_attempt(attempt: &ExtractionAttempt, json: bool) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&AttemptRecord::from(attempt))?
        );
        return Ok(());
    }

    println!("\n{}", style(format!("Attempt {}", attempt.id)).bold());
    println!("{}", "-".repeat(40));
    println!("{:<14} {}", "Document:", attempt.document_id);
    println!("{:<14} {}", "Status:", status_label(attempt.status));
    if let Some(stage) = attempt.stage {
        println!("{:<14} {}", "Stage:", stage);
    }
    println!("{:<14} {}", "Retry:", attempt.retry_count);

    if attempt.status == AttemptStatus::Failed {
        if let Some(kind) = attempt.error_kind {
            println!("{:<14} {}", "Error kind:", style(kind.as_str()).red());
        }
        if let Some(ref message) = attempt.error_message {
            println!("{:<14} {}", "Error:", message);
        }
        println!(
            "  {} Retry with: farmdoc retry {}",
            style("→").dim(),
            attempt.document_id
        );
        return Ok(());
    }

    println!("{:<14} {}", "Source:", attempt.source);
    println!("{:<14} {:.3}", "Confidence:", attempt.confidence);
    if attempt.low_content {
        println!(
            "  {} Very little text was found in this document",
            style("!").yellow()
        );
    }
    if attempt.needs_review {
        println!("  {} Flagged for human review", style("!").yellow());
    }

    if attempt.fields.is_empty() {
        println!("  {} No fields extracted", style("!").yellow());
        return Ok(());
    }
    println!();
    for (name, field) in &attempt.fields {
        println!(
            "  {:<24} {:<32} {:>5.2}  {}",
            name.to_string(),
            field.value.to_string(),
            field.confidence,
            style(field.source.as_str()).dim()
        );
    }
    Ok(())
}
