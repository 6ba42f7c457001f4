//! CLI parser and dispatch to command-specific modules.

mod extract;
mod init;
mod llm;
mod review;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, AiMode, LoadOptions};

#[derive(Parser)]
#[command(name = "farmdoc")]
#[command(about = "Field extraction for farm subsidy documents")]
#[command(version)]
pub struct Cli {
    /// Data directory or database file (overrides config file).
    /// Can be a directory containing farmdoc.db or a .db file directly.
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// When to call the AI extractor (never, escalate, always)
    #[arg(long, global = true, value_parser = parse_ai_mode)]
    ai_mode: Option<AiMode>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

fn parse_ai_mode(s: &str) -> Result<AiMode, String> {
    AiMode::from_str(s).ok_or_else(|| format!("expected never, escalate or always, got '{}'", s))
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Extract fields from a document file and wait for the result
    Extract {
        /// Path to the uploaded file
        file: PathBuf,
        /// Document ID (a new UUID if omitted)
        #[arg(long)]
        document_id: Option<String>,
        /// Document category (subsidy_application, farm_registration, land_lease,
        /// invoice, certificate, other)
        #[arg(long, default_value = "other")]
        category: String,
        /// Farm the document belongs to
        #[arg(long)]
        farm_id: Option<String>,
        /// MIME type (detected from content or extension if omitted)
        #[arg(long)]
        mime: Option<String>,
        /// Run the AI extractor regardless of rule confidence
        #[arg(long)]
        force_ai: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retry the latest failed attempt of a document
    Retry {
        /// Document ID
        #[arg(required_unless_present = "attempt")]
        document_id: Option<String>,
        /// Retry a specific attempt instead (must still be the latest)
        #[arg(long, conflicts_with = "document_id")]
        attempt: Option<String>,
        /// Run the AI extractor regardless of rule confidence
        #[arg(long)]
        force_ai: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the latest extraction attempt of a document
    Status {
        /// Document ID
        document_id: String,
        /// Show every attempt, oldest first
        #[arg(short, long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Correct field values on an attempt
    Correct {
        /// Attempt ID
        attempt_id: String,
        /// Reviewer identity recorded in the audit trail
        #[arg(long, env = "FARMDOC_REVIEWER")]
        reviewer: String,
        /// Corrected value as name=value (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE", required = true)]
        values: Vec<String>,
        /// Free-form note stored with the review
        #[arg(long)]
        notes: Option<String>,
    },

    /// Show the review history of an attempt
    History {
        /// Attempt ID
        attempt_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show LLM configuration and availability
    Llm,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, config) = load_settings_with_options(options).await;

    let mut policy = config.policy();
    if let Some(mode) = cli.ai_mode {
        policy.ai_mode = mode;
    }

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Extract {
            file,
            document_id,
            category,
            farm_id,
            mime,
            force_ai,
            json,
        } => {
            extract::cmd_extract(
                &settings,
                &config,
                policy,
                &file,
                document_id,
                &category,
                farm_id,
                mime.as_deref(),
                force_ai,
                json,
            )
            .await
        }
        Commands::Retry {
            document_id,
            attempt,
            force_ai,
            json,
        } => {
            extract::cmd_retry(
                &settings,
                &config,
                policy,
                document_id,
                attempt,
                force_ai,
                json,
            )
            .await
        }
        Commands::Status {
            document_id,
            all,
            json,
        } => status::cmd_status(&settings, &document_id, all, json).await,
        Commands::Correct {
            attempt_id,
            reviewer,
            values,
            notes,
        } => review::cmd_correct(&settings, &attempt_id, &reviewer, &values, notes).await,
        Commands::History { attempt_id, json } => {
            review::cmd_history(&settings, &attempt_id, json).await
        }
        Commands::Llm => llm::cmd_llm(&config).await,
    }
}
