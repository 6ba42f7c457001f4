//! Configuration management for farmdoc using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::LlmConfig;
use crate::repository::DieselAttemptStore;

/// Retries allowed per document after the initial attempt.
pub const MAX_RETRIES: u32 = 3;
/// Provider calls made by the AI extractor before giving up.
pub const AI_ATTEMPT_CAP: u32 = 3;
/// Provider calls made by the text adapter before giving up.
pub const TEXT_ATTEMPT_CAP: u32 = 3;
/// Text shorter than this is flagged as low content.
pub const MIN_TEXT_CHARS: usize = 50;
/// Rule aggregate below which AI extraction is escalated.
pub const ESCALATION_THRESHOLD: f64 = 0.6;
/// Completed attempts below this confidence are flagged for review.
pub const REVIEW_THRESHOLD: f64 = 0.5;
/// Confidence multiplier for AI fields extracted from truncated text.
pub const TRUNCATION_PENALTY: f64 = 0.8;
/// Concurrent attempts before triggers are rejected.
pub const MAX_IN_FLIGHT: usize = 8;
/// Timeout around every provider call.
pub const STAGE_TIMEOUT_SECS: u64 = 120;
/// Base delay for exponential backoff.
pub const BACKOFF_BASE_MS: u64 = 500;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "farmdoc.db";

/// When the pipeline calls the AI extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    /// Only when forced by the caller.
    Never,
    /// When rule confidence is below the escalation threshold.
    #[default]
    Escalate,
    /// On every run, concurrently with rules.
    Always,
}

impl AiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Escalate => "escalate",
            Self::Always => "always",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "never" | "off" => Some(Self::Never),
            "escalate" | "auto" => Some(Self::Escalate),
            "always" | "on" => Some(Self::Always),
            _ => None,
        }
    }
}

impl prefer::FromValue for AiMode {
    fn from_value(value: &prefer::ConfigValue) -> prefer::Result<Self> {
        match value.as_str() {
            Some(s) => AiMode::from_str(s).ok_or_else(|| prefer::Error::ConversionError {
                key: String::new(),
                type_name: "AiMode".to_string(),
                source: format!("unknown ai mode: {}", s).into(),
            }),
            None => Err(prefer::Error::ConversionError {
                key: String::new(),
                type_name: "AiMode".to_string(),
                source: "expected string".into(),
            }),
        }
    }
}

/// Runtime extraction policy. Every numeric knob of the pipeline lives here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionPolicy {
    pub ai_mode: AiMode,
    pub max_retries: u32,
    pub ai_attempt_cap: u32,
    pub text_attempt_cap: u32,
    pub min_text_chars: usize,
    pub escalation_threshold: f64,
    pub review_threshold: f64,
    pub truncation_penalty: f64,
    pub max_in_flight: usize,
    pub stage_timeout: Duration,
    pub backoff_base_ms: u64,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            ai_mode: AiMode::default(),
            max_retries: MAX_RETRIES,
            ai_attempt_cap: AI_ATTEMPT_CAP,
            text_attempt_cap: TEXT_ATTEMPT_CAP,
            min_text_chars: MIN_TEXT_CHARS,
            escalation_threshold: ESCALATION_THRESHOLD,
            review_threshold: REVIEW_THRESHOLD,
            truncation_penalty: TRUNCATION_PENALTY,
            max_in_flight: MAX_IN_FLIGHT,
            stage_timeout: Duration::from_secs(STAGE_TIMEOUT_SECS),
            backoff_base_ms: BACKOFF_BASE_MS,
        }
    }
}

/// Extraction settings from the config file. Unset values keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct ExtractionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_mode: Option<AiMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_attempt_cap: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_attempt_cap: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_text_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    /// Tesseract language codes, e.g. "eng+deu".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_language: Option<String>,
}

impl ExtractionConfig {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay configured values on the built-in policy.
    pub fn to_policy(&self) -> ExtractionPolicy {
        let d = ExtractionPolicy::default();
        ExtractionPolicy {
            ai_mode: self.ai_mode.unwrap_or(d.ai_mode),
            max_retries: self.max_retries.unwrap_or(d.max_retries),
            ai_attempt_cap: self.ai_attempt_cap.unwrap_or(d.ai_attempt_cap).max(1),
            text_attempt_cap: self.text_attempt_cap.unwrap_or(d.text_attempt_cap).max(1),
            min_text_chars: self.min_text_chars.unwrap_or(d.min_text_chars),
            escalation_threshold: self
                .escalation_threshold
                .map(f64::from)
                .unwrap_or(d.escalation_threshold),
            review_threshold: self
                .review_threshold
                .map(f64::from)
                .unwrap_or(d.review_threshold),
            truncation_penalty: self
                .truncation_penalty
                .map(|p| f64::from(p).clamp(0.0, 1.0))
                .unwrap_or(d.truncation_penalty),
            max_in_flight: self.max_in_flight.unwrap_or(d.max_in_flight).max(1),
            stage_timeout: self
                .stage_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(d.stage_timeout),
            backoff_base_ms: self.backoff_base_ms.unwrap_or(d.backoff_base_ms),
        }
    }

    pub fn ocr_language(&self) -> &str {
        self.ocr_language.as_deref().unwrap_or("eng")
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    /// Set via DATABASE_URL env var.
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("farmdoc");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        self.database_url.is_some() || self.database_path().exists()
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    /// Open the attempt store for the configured database.
    pub fn create_store(&self) -> Result<DieselAttemptStore, diesel::result::Error> {
        DieselAttemptStore::from_url(&self.database_url())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Extraction policy overrides.
    #[serde(default, skip_serializing_if = "ExtractionConfig::is_default")]
    #[prefer(default)]
    pub extraction: ExtractionConfig,
    /// LLM generation settings.
    #[serde(default, skip_serializing_if = "LlmConfig::is_default")]
    #[prefer(default)]
    pub llm: LlmConfig,
    /// Path the config was loaded from.
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers farmdoc config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("farmdoc").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring config {}: {}", path.display(), e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Format is chosen by file extension (toml, yaml/yml, json).
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
    }

    /// Effective extraction policy.
    pub fn policy(&self) -> ExtractionPolicy {
        self.extraction.to_policy()
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory or database file (--data flag).
    pub data: Option<PathBuf>,
}

/// Resolve a --data argument to (data dir, database filename).
fn resolve_data_path(path: &Path) -> (PathBuf, Option<String>) {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };

    let is_db_file = path
        .extension()
        .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3");

    if is_db_file {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        (dir, filename)
    } else {
        (path, None)
    }
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = match options.config_path {
        Some(ref path) => match Config::load_from_path(path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                Config::default()
            }
        },
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    // --data override takes precedence over the config file
    if let Some(ref data) = options.data {
        let (dir, filename) = resolve_data_path(data);
        settings.data_dir = dir;
        if let Some(filename) = filename {
            settings.database_filename = filename;
        }
    }

    // DATABASE_URL environment variable takes highest precedence
    if let Some(url) = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
        tracing::debug!("Using DATABASE_URL from environment: {}", url);
        settings.database_url = Some(url);
    }

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = ExtractionConfig::default().to_policy();
        assert_eq!(policy, ExtractionPolicy::default());
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.ai_mode, AiMode::Escalate);
    }

    #[test]
    fn test_policy_overrides_from_toml() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/tmp/farmdoc"

            [extraction]
            ai_mode = "always"
            max_retries = 5
            review_threshold = 0.25

            [llm]
            max_content_chars = 2000
            "#,
        )
        .unwrap();

        let policy = config.policy();
        assert_eq!(policy.ai_mode, AiMode::Always);
        assert_eq!(policy.max_retries, 5);
        assert!((policy.review_threshold - 0.25).abs() < 1e-6);
        assert_eq!(policy.ai_attempt_cap, AI_ATTEMPT_CAP);
        assert_eq!(config.llm.app.max_content_chars, 2000);
    }

    #[tokio::test]
    async fn test_load_from_yaml_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("farmdoc.yaml");
        std::fs::write(&path, "database: other.db\nextraction:\n  ai_mode: never\n").unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.database.as_deref(), Some("other.db"));
        assert_eq!(config.policy().ai_mode, AiMode::Never);
        assert_eq!(config.base_dir().as_deref(), Some(dir.path()));

        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        config.apply_to_settings(&mut settings, dir.path());
        assert_eq!(settings.database_path(), dir.path().join("other.db"));
        assert!(settings.database_url().starts_with("sqlite:"));
    }

    #[test]
    fn test_resolve_data_path() {
        let (dir, file) = resolve_data_path(Path::new("/var/lib/farm/data.db"));
        assert_eq!(dir, PathBuf::from("/var/lib/farm"));
        assert_eq!(file.as_deref(), Some("data.db"));

        let (dir, file) = resolve_data_path(Path::new("/var/lib/farm"));
        assert_eq!(dir, PathBuf::from("/var/lib/farm"));
        assert!(file.is_none());
    }
}
