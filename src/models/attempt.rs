//! Extraction attempt model and its state machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::field::{mean_confidence, FieldMap, FieldName, FieldSource, FieldValue};

/// Lifecycle status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Reviewed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Reviewed => "reviewed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "reviewed" => Some(Self::Reviewed),
            _ => None,
        }
    }

    /// Whether the pipeline has finished with this attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Reviewed)
    }

    /// Forward-only transition table.
    ///
    /// `reviewed` is entered only through the review layer; re-review keeps
    /// the attempt in `reviewed`.
    pub fn can_transition_to(&self, next: AttemptStatus) -> bool {
        use AttemptStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Reviewed)
                | (Failed, Reviewed)
                | (Reviewed, Reviewed)
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-stage of a `processing` attempt. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    TextExtraction,
    RuleExtraction,
    AiExtraction,
    Merge,
}

impl ExtractionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextExtraction => "text_extraction",
            Self::RuleExtraction => "rule_extraction",
            Self::AiExtraction => "ai_extraction",
            Self::Merge => "merge",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text_extraction" => Some(Self::TextExtraction),
            "rule_extraction" => Some(Self::RuleExtraction),
            "ai_extraction" => Some(Self::AiExtraction),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }

    /// Progress reported when the stage starts.
    pub fn progress_percent(&self) -> u8 {
        match self {
            Self::TextExtraction => 10,
            Self::RuleExtraction => 35,
            Self::AiExtraction => 60,
            Self::Merge => 90,
        }
    }

    /// Whether a retry after a failure at this stage can reuse cached text.
    pub fn reuses_text(&self) -> bool {
        matches!(self, Self::AiExtraction | Self::Merge)
    }
}

impl fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt-level provenance label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionSource {
    #[serde(rename = "rule-based")]
    RuleBased,
    #[serde(rename = "ai-based")]
    AiBased,
    #[serde(rename = "merged")]
    Merged,
    #[serde(rename = "manual")]
    Manual,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleBased => "rule-based",
            Self::AiBased => "ai-based",
            Self::Merged => "merged",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rule-based" => Some(Self::RuleBased),
            "ai-based" => Some(Self::AiBased),
            "merged" => Some(Self::Merged),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl From<FieldSource> for ExtractionSource {
    fn from(source: FieldSource) -> Self {
        match source {
            FieldSource::RuleBased => Self::RuleBased,
            FieldSource::AiBased => Self::AiBased,
            FieldSource::Manual => Self::Manual,
        }
    }
}

impl fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable failure class recorded on failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedFormat,
    TransientProvider,
    ProviderTimeout,
    ProviderError,
    RateLimited,
    InvalidConfidence,
    UnknownField,
    Storage,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "unsupported_format",
            Self::TransientProvider => "transient_provider",
            Self::ProviderTimeout => "provider_timeout",
            Self::ProviderError => "provider_error",
            Self::RateLimited => "rate_limited",
            Self::InvalidConfidence => "invalid_confidence",
            Self::UnknownField => "unknown_field",
            Self::Storage => "storage",
            Self::Internal => "internal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unsupported_format" => Some(Self::UnsupportedFormat),
            "transient_provider" => Some(Self::TransientProvider),
            "provider_timeout" => Some(Self::ProviderTimeout),
            "provider_error" => Some(Self::ProviderError),
            "rate_limited" => Some(Self::RateLimited),
            "invalid_confidence" => Some(Self::InvalidConfidence),
            "unknown_field" => Some(Self::UnknownField),
            "storage" => Some(Self::Storage),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid status transition: {from} -> {to}")]
    Invalid {
        from: AttemptStatus,
        to: AttemptStatus,
    },
}

/// One run of the pipeline against a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub id: String,
    pub document_id: String,
    pub status: AttemptStatus,
    /// Current sub-stage while processing; the failing stage after failure.
    pub stage: Option<ExtractionStage>,
    pub source: ExtractionSource,
    /// Aggregate confidence in [0, 1].
    pub confidence: f64,
    pub fields: FieldMap,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub failed_stage: Option<ExtractionStage>,
    pub retry_count: i32,
    pub force_ai: bool,
    /// Input text was below the minimum length.
    pub low_content: bool,
    /// Completed with low confidence; a human should look at it.
    pub needs_review: bool,
    /// Optimistic concurrency token, bumped on every persisted update.
    pub revision: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionAttempt {
    /// Create a new pending attempt.
    pub fn new(document_id: &str, retry_count: i32, force_ai: bool) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            status: AttemptStatus::Pending,
            stage: None,
            source: ExtractionSource::RuleBased,
            confidence: 0.0,
            fields: FieldMap::new(),
            error_message: None,
            error_kind: None,
            failed_stage: None,
            retry_count,
            force_ai,
            low_content: false,
            needs_review: false,
            revision: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: AttemptStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `pending -> processing`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(AttemptStatus::Processing)?;
        self.started_at = Some(self.updated_at);
        self.stage = Some(ExtractionStage::TextExtraction);
        Ok(())
    }

    /// Advance the advisory sub-stage.
    pub fn enter_stage(&mut self, stage: ExtractionStage) {
        self.stage = Some(stage);
        self.updated_at = Utc::now();
    }

    /// `processing -> completed`.
    pub fn complete(
        &mut self,
        fields: FieldMap,
        confidence: f64,
        source: ExtractionSource,
    ) -> Result<(), TransitionError> {
        self.transition(AttemptStatus::Completed)?;
        self.fields = fields;
        self.confidence = confidence;
        self.source = source;
        self.stage = None;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// `pending|processing -> failed`.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        stage: ExtractionStage,
    ) -> Result<(), TransitionError> {
        self.transition(AttemptStatus::Failed)?;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        self.failed_stage = Some(stage);
        self.stage = Some(stage);
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// Apply reviewer overrides. Overridden fields become `manual`.
    pub fn apply_review(
        &mut self,
        corrections: &BTreeMap<FieldName, FieldValue>,
    ) -> Result<(), TransitionError> {
        self.transition(AttemptStatus::Reviewed)?;
        for (name, value) in corrections {
            self.fields.insert(
                name.clone(),
                super::field::ExtractedField {
                    value: value.clone(),
                    confidence: 1.0,
                    source: FieldSource::Manual,
                },
            );
        }
        self.confidence = mean_confidence(&self.fields);
        if !self.fields.is_empty()
            && self.fields.values().all(|f| f.source == FieldSource::Manual)
        {
            self.source = ExtractionSource::Manual;
        }
        self.needs_review = false;
        Ok(())
    }

    /// Which source supplied each field.
    pub fn field_sources(&self) -> BTreeMap<FieldName, FieldSource> {
        self.fields
            .iter()
            .map(|(name, field)| (name.clone(), field.source))
            .collect()
    }

    /// Whether this attempt may be corrected by a reviewer.
    pub fn is_reviewable(&self) -> bool {
        matches!(
            self.status,
            AttemptStatus::Completed | AttemptStatus::Failed | AttemptStatus::Reviewed
        )
    }
}

/// Externally visible attempt record.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt_id: String,
    pub document_id: String,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<ExtractionStage>,
    pub source: ExtractionSource,
    pub confidence: f64,
    pub fields: BTreeMap<FieldName, FieldValue>,
    pub field_sources: BTreeMap<FieldName, FieldSource>,
    pub field_confidences: BTreeMap<FieldName, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<ExtractionStage>,
    pub retry_count: i32,
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ExtractionAttempt> for AttemptRecord {
    fn from(attempt: &ExtractionAttempt) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            document_id: attempt.document_id.clone(),
            status: attempt.status,
            stage: attempt.stage,
            source: attempt.source,
            confidence: attempt.confidence,
            fields: attempt
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect(),
            field_sources: attempt.field_sources(),
            field_confidences: attempt
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.confidence))
                .collect(),
            error_message: attempt.error_message.clone(),
            failed_stage: attempt.failed_stage,
            retry_count: attempt.retry_count,
            needs_review: attempt.needs_review,
            created_at: attempt.created_at,
            updated_at: attempt.updated_at,
        }
    }
}
