//! LLM client configuration.
//!
//! Split into two tiers:
//! - `LlmAppConfig`: from the config file (prompt, generation params)
//! - `LlmDeviceConfig`: from env vars, device-specific (provider, endpoint, model, api_key)
//!
//! Env vars: LLM_PROVIDER, LLM_MODEL, LLM_ENDPOINT, LLM_API_KEY, OLLAMA_HOST,
//! GROQ_API_KEY, OPENAI_API_KEY

use serde::{Deserialize, Serialize};

use super::prompts::DEFAULT_FIELD_PROMPT;

/// LLM provider type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama API (local, default)
    #[default]
    Ollama,
    /// OpenAI-compatible API (OpenAI, Groq, Together.ai, etc.)
    OpenAI,
}

impl prefer::FromValue for LlmProvider {
    fn from_value(value: &prefer::ConfigValue) -> prefer::Result<Self> {
        match value.as_str() {
            Some(s) => LlmProvider::from_str(s).ok_or_else(|| prefer::Error::ConversionError {
                key: String::new(),
                type_name: "LlmProvider".to_string(),
                source: format!("unknown provider: {}", s).into(),
            }),
            None => Err(prefer::Error::ConversionError {
                key: String::new(),
                type_name: "LlmProvider".to_string(),
                source: "expected string".into(),
            }),
        }
    }
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openai" | "groq" | "together" => Some(Self::OpenAI),
            _ => None,
        }
    }
}

/// Application-level LLM config.
/// Controls what the model is asked to do, not how to connect to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct LlmAppConfig {
    /// Whether AI field extraction is enabled
    #[serde(default = "default_enabled")]
    #[prefer(default)]
    pub enabled: bool,
    /// Maximum tokens in response
    #[serde(default = "default_max_tokens")]
    #[prefer(default)]
    pub max_tokens: u32,
    /// Temperature for generation (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    #[prefer(default)]
    pub temperature: f32,
    /// Custom extraction prompt (uses {category}, {fields} and {content} placeholders)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[prefer(default)]
    pub field_prompt: Option<String>,
    /// Maximum characters of document text to send to the model
    #[serde(default = "default_max_content_chars")]
    #[prefer(default)]
    pub max_content_chars: usize,
    /// HTTP timeout for a single model call
    #[serde(default = "default_request_timeout_secs")]
    #[prefer(default)]
    pub request_timeout_secs: u64,
}

/// Device-level LLM config (from env vars, varies per device).
/// Controls how to connect to the LLM backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmDeviceConfig {
    /// LLM provider (ollama or openai)
    pub provider: LlmProvider,
    /// API endpoint (provider-specific defaults apply)
    pub endpoint: String,
    /// Model used for field extraction
    pub model: String,
    /// API key for OpenAI-compatible providers
    pub api_key: Option<String>,
}

/// Combined LLM configuration (runtime).
///
/// Serde: only the app config is serialized/deserialized.
/// Device config is populated from environment variables during Default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct LlmConfig {
    #[serde(flatten)]
    #[prefer(flatten)]
    pub app: LlmAppConfig,
    #[serde(skip)]
    #[prefer(skip)]
    pub device: LlmDeviceConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_content_chars() -> usize {
    12000
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for LlmAppConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            field_prompt: None,
            max_content_chars: default_max_content_chars(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LlmAppConfig {
    /// Check if the config equals the default (for skip_serializing_if).
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Get the extraction prompt, using custom or default.
    pub fn get_field_prompt(&self) -> &str {
        self.field_prompt.as_deref().unwrap_or(DEFAULT_FIELD_PROMPT)
    }
}

impl Default for LlmDeviceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LlmDeviceConfig {
    /// Create device config from environment variables.
    ///
    /// Priority: LLM_PROVIDER wins over auto-detection from API keys.
    pub fn from_env() -> Self {
        let mut config = Self {
            provider: LlmProvider::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
        };

        let explicit_provider = std::env::var("LLM_PROVIDER").ok();
        if let Some(ref val) = explicit_provider {
            if let Some(provider) = LlmProvider::from_str(val) {
                config.provider = provider;
            }
        }

        // Explicit endpoint always wins, then OLLAMA_HOST for Ollama provider
        let explicit_endpoint = std::env::var("LLM_ENDPOINT").ok();
        if let Some(ref endpoint) = explicit_endpoint {
            config.endpoint = endpoint.clone();
        } else if let Ok(ollama_host) = std::env::var("OLLAMA_HOST") {
            config.endpoint = ollama_host;
        }

        if let Ok(val) = std::env::var("LLM_API_KEY") {
            config.api_key = Some(val);
        }

        let explicit_model = std::env::var("LLM_MODEL").ok();

        if let Some(ref provider_str) = explicit_provider {
            let provider_lower = provider_str.to_lowercase();

            if explicit_endpoint.is_none() {
                match provider_lower.as_str() {
                    "groq" => config.endpoint = "https://api.groq.com/openai".to_string(),
                    "openai" => config.endpoint = "https://api.openai.com".to_string(),
                    "together" => config.endpoint = "https://api.together.xyz".to_string(),
                    _ => {}
                }
            }

            if config.api_key.is_none() {
                match provider_lower.as_str() {
                    "groq" => config.api_key = std::env::var("GROQ_API_KEY").ok(),
                    "openai" => config.api_key = std::env::var("OPENAI_API_KEY").ok(),
                    _ => {}
                }
            }

            if explicit_model.is_none() {
                match provider_lower.as_str() {
                    "groq" => config.model = "llama-3.3-70b-versatile".to_string(),
                    "openai" => config.model = "gpt-4o-mini".to_string(),
                    "together" => {
                        config.model = "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo".to_string()
                    }
                    _ => {}
                }
            }
        } else if config.api_key.is_none() {
            // No explicit provider - auto-detect from available keys
            if let Ok(key) = std::env::var("GROQ_API_KEY") {
                config.api_key = Some(key);
                config.provider = LlmProvider::OpenAI;
                if explicit_endpoint.is_none() {
                    config.endpoint = "https://api.groq.com/openai".to_string();
                }
                config.model = "llama-3.3-70b-versatile".to_string();
            } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                config.api_key = Some(key);
                config.provider = LlmProvider::OpenAI;
                if explicit_endpoint.is_none() {
                    config.endpoint = "https://api.openai.com".to_string();
                }
                config.model = "gpt-4o-mini".to_string();
            }
        }

        if let Some(model) = explicit_model {
            config.model = model;
        }

        config
    }

    /// Get the provider name for display.
    pub fn provider_name(&self) -> &'static str {
        match self.provider {
            LlmProvider::Ollama => "Ollama",
            LlmProvider::OpenAI => {
                if self.endpoint.contains("groq.com") {
                    "Groq"
                } else if self.endpoint.contains("together.xyz") {
                    "Together.ai"
                } else {
                    "OpenAI"
                }
            }
        }
    }

    /// Get a provider-aware availability hint for error messages.
    pub fn availability_hint(&self) -> String {
        match self.provider {
            LlmProvider::Ollama => format!(
                "Ollama not available at {}. Make sure Ollama is running: ollama serve",
                self.endpoint
            ),
            LlmProvider::OpenAI => {
                if self.api_key.is_none() {
                    "API key not set. Set LLM_API_KEY, OPENAI_API_KEY or GROQ_API_KEY".to_string()
                } else {
                    format!("OpenAI-compatible API not available at {}", self.endpoint)
                }
            }
        }
    }
}

impl LlmConfig {
    pub fn new(app: LlmAppConfig, device: LlmDeviceConfig) -> Self {
        Self { app, device }
    }

    /// Check if the config equals the default (for skip_serializing_if).
    pub fn is_default(&self) -> bool {
        self.app.is_default()
    }

    pub fn enabled(&self) -> bool {
        self.app.enabled
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.device.provider
    }

    pub fn endpoint(&self) -> &str {
        &self.device.endpoint
    }

    pub fn model(&self) -> &str {
        &self.device.model
    }

    pub fn api_key(&self) -> Option<&str> {
        self.device.api_key.as_deref()
    }

    pub fn max_content_chars(&self) -> usize {
        self.app.max_content_chars
    }

    pub fn provider_name(&self) -> &'static str {
        self.device.provider_name()
    }

    pub fn availability_hint(&self) -> String {
        self.device.availability_hint()
    }
}
