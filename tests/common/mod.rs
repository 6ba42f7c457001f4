//! Shared fakes for pipeline integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use farmdoc::config::{AiMode, ExtractionPolicy};
use farmdoc::extract::{AiError, FieldModel, ModelOutput, RawText, TextError, TextExtractor};
use farmdoc::models::{CanonicalField, DocumentCategory, FieldCandidate, FieldSource};
use farmdoc::pipeline::ExtractionInput;

pub const HAPPY_TEXT: &str = "Farm Name: Green Acres, Owner: J. Smith";

/// Text adapter returning fixed text and counting calls.
pub struct FixedText {
    text: String,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl FixedText {
    pub fn new(text: &str) -> Arc<Self> {
        Self::slow(text, Duration::ZERO)
    }

    pub fn slow(text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for FixedText {
    async fn extract_text(
        &self,
        _storage_ref: &str,
        _mime_type: &str,
    ) -> Result<RawText, TextError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(RawText::new(self.text.clone(), 1))
    }
}

/// Text adapter failing with the scripted errors, then returning `text`.
/// With no text it keeps failing transiently.
pub struct FlakyText {
    failures: Mutex<VecDeque<TextError>>,
    text: Option<String>,
    pub calls: AtomicUsize,
}

impl FlakyText {
    pub fn new(failures: Vec<TextError>, text: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into()),
            text: text.map(str::to_string),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for FlakyText {
    async fn extract_text(
        &self,
        _storage_ref: &str,
        _mime_type: &str,
    ) -> Result<RawText, TextError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        match &self.text {
            Some(text) => Ok(RawText::new(text.clone(), 1)),
            None => Err(ocr_down()),
        }
    }
}

pub fn ocr_down() -> TextError {
    TextError::TransientProviderError("OCR service unavailable".to_string())
}

/// Model answering from a script, then with a fallback.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelOutput, AiError>>>,
    fallback: Result<ModelOutput, AiError>,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(
        script: Vec<Result<ModelOutput, AiError>>,
        fallback: Result<ModelOutput, AiError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(output: Result<ModelOutput, AiError>) -> Arc<Self> {
        Self::new(Vec::new(), output)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FieldModel for ScriptedModel {
    async fn extract(
        &self,
        _text: &str,
        _category: DocumentCategory,
    ) -> Result<ModelOutput, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().await.pop_front() {
            Some(next) => next,
            None => self.fallback.clone(),
        }
    }
}

/// Model output from the happy-path document.
pub fn happy_ai_output() -> ModelOutput {
    ModelOutput::new(vec![
        FieldCandidate::text(CanonicalField::FarmName, "Green Acres", 0.95, FieldSource::AiBased),
        FieldCandidate::text(
            CanonicalField::ContactEmail,
            "j@example.com",
            0.6,
            FieldSource::AiBased,
        ),
    ])
}

pub fn timeout() -> AiError {
    AiError::ProviderTimeout("model did not answer".to_string())
}

/// Fast policy for tests.
pub fn policy(ai_mode: AiMode) -> ExtractionPolicy {
    ExtractionPolicy {
        ai_mode,
        backoff_base_ms: 1,
        stage_timeout: Duration::from_secs(5),
        ..ExtractionPolicy::default()
    }
}

pub fn input(document_id: &str) -> ExtractionInput {
    ExtractionInput {
        document_id: document_id.to_string(),
        storage_ref: format!("file:///uploads/{}.pdf", document_id),
        file_name: String::new(),
        mime_type: "application/pdf".to_string(),
        category: DocumentCategory::FarmRegistration,
        farm_id: Some("farm-7".to_string()),
        force_ai: false,
    }
}
