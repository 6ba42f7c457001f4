//! LLM client for document field extraction.
//!
//! Supports Ollama (`/api/generate`) and OpenAI-compatible
//! (`/v1/chat/completions`) providers such as Groq, OpenAI and Together.

mod config;
mod prompts;

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use config::{LlmAppConfig, LlmConfig, LlmDeviceConfig, LlmProvider};
pub use prompts::DEFAULT_FIELD_PROMPT;

use crate::rate_limit::parse_retry_after;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Connect or read timed out
    #[error("Request timed out: {0}")]
    Timeout(String),
    /// Provider answered 429
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    /// Failed to connect to LLM service
    #[error("Connection error: {0}")]
    Connection(String),
    /// API returned an error
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),
    /// LLM is disabled
    #[error("LLM is disabled")]
    Disabled,
}

impl LlmError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else {
            LlmError::Connection(err.to_string())
        }
    }
}

/// LLM client for document processing.
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// OpenAI-compatible chat request.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

/// Model output for one extraction prompt.
#[derive(Debug, Clone)]
pub struct FieldCompletion {
    /// Raw model text, expected to contain JSON.
    pub raw: String,
    /// Whether the document text was cut to fit the context limit.
    pub truncated: bool,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.app.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Get the config.
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Check if the LLM service is available.
    pub async fn is_available(&self) -> bool {
        if !self.config.enabled() {
            return false;
        }
        match self.config.provider() {
            LlmProvider::Ollama => {
                let url = format!("{}/api/tags", self.config.endpoint());
                match self.client.get(&url).send().await {
                    Ok(resp) => resp.status().is_success(),
                    Err(_) => false,
                }
            }
            LlmProvider::OpenAI => {
                let Some(key) = self.config.api_key() else {
                    return false;
                };
                let url = format!("{}/v1/models", self.config.endpoint());
                match self.client.get(&url).bearer_auth(key).send().await {
                    Ok(resp) => resp.status().is_success(),
                    Err(_) => false,
                }
            }
        }
    }

    /// Ask the model for the fields of one document.
    pub async fn extract_fields(
        &self,
        text: &str,
        category: &str,
        known_fields: &[&str],
    ) -> Result<FieldCompletion, LlmError> {
        if !self.config.enabled() {
            return Err(LlmError::Disabled);
        }

        let (content, truncated) = truncate_content(text, self.config.max_content_chars());
        if truncated {
            debug!(
                "Truncated document text from {} to {} bytes",
                text.len(),
                content.len()
            );
        }

        let prompt = self
            .config
            .app
            .get_field_prompt()
            .replace("{category}", category)
            .replace("{fields}", &known_fields.join(", "))
            .replace("{content}", content);

        debug!(
            "Requesting field extraction from {} ({})",
            self.config.provider_name(),
            self.config.model()
        );
        let raw = self.generate(&prompt).await?;
        if raw.trim().is_empty() {
            return Err(LlmError::Parse("Empty model response".to_string()));
        }

        Ok(FieldCompletion { raw, truncated })
    }

    /// Send a single prompt to the configured provider.
    pub async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        match self.config.provider() {
            LlmProvider::Ollama => self.call_ollama(prompt).await,
            LlmProvider::OpenAI => self.call_openai(prompt).await,
        }
    }

    /// Call Ollama API with a prompt.
    async fn call_ollama(&self, prompt: &str) -> Result<String, LlmError> {
        let request = OllamaRequest {
            model: self.config.model().to_string(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.config.app.temperature,
                num_predict: self.config.app.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.config.endpoint());
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let resp = check_status(resp).await?;
        let ollama_resp: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(ollama_resp.response)
    }

    /// Call an OpenAI-compatible chat completions API.
    async fn call_openai(&self, prompt: &str) -> Result<String, LlmError> {
        let api_key = self.config.api_key().ok_or_else(|| LlmError::Api {
            status: 401,
            message: self.config.availability_hint(),
        })?;

        let request = ChatRequest {
            model: self.config.model().to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.app.max_tokens,
            temperature: self.config.app.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.config.endpoint());
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let resp = check_status(resp).await?;
        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        if let Some(error) = chat.error {
            return Err(LlmError::Api {
                status: 200,
                message: error.message,
            });
        }

        chat.choices
            .and_then(|c| c.into_iter().next())
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("Response has no choices".to_string()))
    }
}

/// Map non-success responses to errors, honouring Retry-After on 429.
async fn check_status(resp: Response) -> Result<Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok());
        return Err(LlmError::RateLimited {
            retry_after: parse_retry_after(retry_after),
        });
    }

    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return Err(LlmError::Timeout(format!("HTTP {}", status)));
    }

    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Api {
        status: status.as_u16(),
        message: body,
    })
}

/// Cut text to at most `max_chars` bytes on a UTF-8 boundary.
///
/// Returns the kept prefix and whether anything was dropped.
pub fn truncate_content(text: &str, max_chars: usize) -> (&str, bool) {
    if text.len() <= max_chars {
        return (text, false);
    }
    let mut end = max_chars;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_content_respects_char_boundaries() {
        assert_eq!(truncate_content("short", 100), ("short", false));

        let text = "Feldgröße: 12 ha";
        // 'ö' occupies bytes 6..8
        let (cut, truncated) = truncate_content(text, 7);
        assert!(truncated);
        assert_eq!(cut, "Feldgr");
    }

    #[test]
    fn test_disabled_client_refuses_requests() {
        let mut config = LlmConfig::default();
        config.app.enabled = false;
        let client = LlmClient::new(config).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(client.extract_fields("text", "other", &["farm_name"]));
        assert!(matches!(result, Err(LlmError::Disabled)));
    }
}
