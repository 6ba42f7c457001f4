//! AI Field Extractor.
//!
//! A [`FieldModel`] makes one provider call. [`AiExtractor`] wraps it with
//! a bounded timeout, an internal retry loop for timeouts and rate limits,
//! and the confidence penalty for truncated input.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExtractionPolicy;
use crate::llm::{LlmClient, LlmError};
use crate::models::{
    CanonicalField, DocumentCategory, FieldCandidate, FieldName, FieldSource, FieldValue,
};
use crate::rate_limit::retry_wait;

/// Confidence assumed when the model omits one.
const DEFAULT_MODEL_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AiError {
    #[error("Provider timeout: {0}")]
    ProviderTimeout(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
}

impl AiError {
    /// Timeouts and rate limits are retried internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderTimeout(_) | Self::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<LlmError> for AiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(msg) => AiError::ProviderTimeout(msg),
            LlmError::RateLimited { retry_after } => AiError::RateLimited { retry_after },
            other => AiError::ProviderError(other.to_string()),
        }
    }
}

/// Result of one model call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub candidates: Vec<FieldCandidate>,
    /// Input was cut to fit the model's context.
    pub truncated: bool,
}

impl ModelOutput {
    pub fn new(candidates: Vec<FieldCandidate>) -> Self {
        Self {
            candidates,
            truncated: false,
        }
    }
}

/// One call to a field-extraction model.
#[async_trait]
pub trait FieldModel: Send + Sync {
    async fn extract(&self, text: &str, category: DocumentCategory)
        -> Result<ModelOutput, AiError>;
}

/// [`FieldModel`] backed by the configured LLM provider.
pub struct LlmFieldModel {
    client: LlmClient,
}

impl LlmFieldModel {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FieldModel for LlmFieldModel {
    async fn extract(
        &self,
        text: &str,
        category: DocumentCategory,
    ) -> Result<ModelOutput, AiError> {
        let known: Vec<&str> = CanonicalField::ALL.iter().map(|f| f.as_str()).collect();
        let completion = self
            .client
            .extract_fields(text, category.as_str(), &known)
            .await?;

        Ok(ModelOutput {
            candidates: parse_model_output(&completion.raw)?,
            truncated: completion.truncated,
        })
    }
}

/// Retry and penalty policy around a [`FieldModel`].
#[derive(Clone)]
pub struct AiExtractor {
    model: Arc<dyn FieldModel>,
    attempt_cap: u32,
    timeout: Duration,
    backoff_base_ms: u64,
    truncation_penalty: f64,
}

impl AiExtractor {
    pub fn new(model: Arc<dyn FieldModel>, policy: &ExtractionPolicy) -> Self {
        Self {
            model,
            attempt_cap: policy.ai_attempt_cap.max(1),
            timeout: policy.stage_timeout,
            backoff_base_ms: policy.backoff_base_ms,
            truncation_penalty: policy.truncation_penalty,
        }
    }

    /// Extract candidates, retrying timeouts and rate limits up to the cap.
    ///
    /// `ProviderError` is returned on first sight.
    pub async fn extract(
        &self,
        text: &str,
        category: DocumentCategory,
    ) -> Result<Vec<FieldCandidate>, AiError> {
        let mut attempt = 0u32;
        loop {
            let call = self.model.extract(text, category);
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(AiError::ProviderTimeout(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f32()
                ))),
            };

            match result {
                Ok(output) => return Ok(self.finish(output)),
                Err(e) if e.is_retryable() && attempt + 1 < self.attempt_cap => {
                    let wait = retry_wait(attempt, self.backoff_base_ms, e.retry_after());
                    warn!(
                        "AI extraction failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt + 1,
                        self.attempt_cap,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn finish(&self, output: ModelOutput) -> Vec<FieldCandidate> {
        if !output.truncated {
            return output.candidates;
        }
        debug!(
            "Input was truncated; scaling {} confidences by {}",
            output.candidates.len(),
            self.truncation_penalty
        );
        output
            .candidates
            .into_iter()
            .map(|mut c| {
                // Out-of-range values stay as they are for the merge to reject.
                if (0.0..=1.0).contains(&c.confidence) {
                    c.confidence *= self.truncation_penalty;
                }
                c
            })
            .collect()
    }
}

/// Slice out the JSON object, dropping code fences and surrounding prose.
fn json_body(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse model output into candidates.
///
/// Accepts `{"fields": [{"name", "value", "confidence"}]}` and, as a
/// fallback, a flat `{"name": value}` object. Names outside the vocabulary
/// are dropped with a warning. Confidences are passed through unchanged so
/// the merge can reject out-of-range values.
pub fn parse_model_output(raw: &str) -> Result<Vec<FieldCandidate>, AiError> {
    let body = json_body(raw)
        .ok_or_else(|| AiError::ProviderError("model response contains no JSON".to_string()))?;
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| AiError::ProviderError(format!("malformed model response: {}", e)))?;

    let entries: Vec<(String, Value, Option<Value>)> = match parsed.get("fields") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?.to_string();
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                Some((name, value, item.get("confidence").cloned()))
            })
            .collect(),
        Some(_) => {
            return Err(AiError::ProviderError(
                "\"fields\" is not an array".to_string(),
            ))
        }
        None => match parsed {
            Value::Object(map) => map
                .into_iter()
                .map(|(name, value)| match value {
                    Value::Object(mut inner) if inner.contains_key("value") => {
                        let v = inner.remove("value").unwrap_or(Value::Null);
                        (name, v, inner.remove("confidence"))
                    }
                    other => (name, other, None),
                })
                .collect(),
            _ => return Err(AiError::ProviderError("expected a JSON object".to_string())),
        },
    };

    let mut candidates = Vec::with_capacity(entries.len());
    for (raw_name, value, confidence) in entries {
        let name = match FieldName::parse(&raw_name) {
            Ok(name) => name,
            Err(e) => {
                warn!("Dropping model field: {}", e);
                continue;
            }
        };
        let Some(value) = FieldValue::from_json(name.kind(), &value) else {
            continue;
        };
        let confidence = match confidence {
            None | Some(Value::Null) => DEFAULT_MODEL_CONFIDENCE,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| {
                AiError::ProviderError(format!("non-numeric confidence for {}: {}", raw_name, s))
            })?,
            Some(other) => {
                return Err(AiError::ProviderError(format!(
                    "non-numeric confidence for {}: {}",
                    raw_name, other
                )))
            }
        };
        candidates.push(FieldCandidate::new(name, value, confidence, FieldSource::AiBased));
    }

    Ok(candidates)
}
