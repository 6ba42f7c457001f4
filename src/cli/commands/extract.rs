//! Extract and retry commands.

use std::path::Path;

use anyhow::Context;
use console::style;

use crate::cli::helpers::{build_service, detect_mime, follow_attempt, print_attempt};
use crate::config::{Config, ExtractionPolicy, Settings};
use crate::models::{AttemptStatus, DocumentCategory};
use crate::pipeline::{ExtractionInput, RetryRequest, RetryTarget};
use crate::storage;

/// Extract fields from a local file and wait for the attempt to finish.
#[allow(clippy::too_many_arguments)]
pub async fn cmd_extract(
    settings: &Settings,
    config: &Config,
    policy: ExtractionPolicy,
    file: &Path,
    document_id: Option<String>,
    category: &str,
    farm_id: Option<String>,
    mime: Option<&str>,
    force_ai: bool,
    json: bool,
) -> anyhow::Result<()> {
    let path = std::fs::canonicalize(file)
        .with_context(|| format!("Cannot read {}", file.display()))?;
    let mime_type = match mime {
        Some(m) => m.to_string(),
        None => detect_mime(&path)?,
    };
    let category = DocumentCategory::from_str(category).unwrap_or_else(|| {
        eprintln!(
            "{} Unknown category '{}', using 'other'",
            style("!").yellow(),
            category
        );
        DocumentCategory::Other
    });

    let service = build_service(settings, config, policy).await?;
    let events = service.subscribe();
    let input = ExtractionInput {
        document_id: document_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        storage_ref: storage::file_ref(&path),
        file_name: String::new(),
        mime_type,
        category,
        farm_id,
        force_ai,
    };

    if !json {
        println!(
            "{} Extracting {} as document {}",
            style("→").cyan(),
            path.display(),
            input.document_id
        );
    }
    let attempt_id = service.trigger(input).await?;
    let attempt = follow_attempt(&service, events, &attempt_id).await?;
    print_attempt(&attempt, json)?;

    if attempt.status == AttemptStatus::Failed {
        anyhow::bail!("Extraction failed");
    }
    Ok(())
}

/// Retry the latest failed attempt of a document.
pub async fn cmd_retry(
    settings: &Settings,
    config: &Config,
    policy: ExtractionPolicy,
    document_id: Option<String>,
    attempt_id: Option<String>,
    force_ai: bool,
    json: bool,
) -> anyhow::Result<()> {
    let target = match (document_id, attempt_id) {
        (_, Some(attempt)) => RetryTarget::Attempt(attempt),
        (Some(document), None) => RetryTarget::Document(document),
        (None, None) => anyhow::bail!("Give a document ID or --attempt"),
    };

    let service = build_service(settings, config, policy).await?;
    let events = service.subscribe();
    let new_attempt = service.retry(RetryRequest { target, force_ai }).await?;

    if !json {
        println!("{} Started attempt {}", style("→").cyan(), new_attempt);
    }
    let attempt = follow_attempt(&service, events, &new_attempt).await?;
    print_attempt(&attempt, json)?;

    if attempt.status == AttemptStatus::Failed {
        anyhow::bail!("Retry failed");
    }
    Ok(())
}
