//! Errors returned by the extraction service, and the mapping from
//! extractor failures to persisted failure kinds.

use thiserror::Error;

use crate::extract::{AiError, TextError};
use crate::merge::MergeError;
use crate::models::{AttemptStatus, ExtractionStage, FailureKind};
use crate::repository::StoreError;

/// Synchronous failure of a trigger call. No attempt was created.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Rate limited: {limit} extractions already in flight")]
    RateLimited { limit: usize },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for TriggerError {
    fn from(err: StoreError) -> Self {
        TriggerError::InternalError(err.to_string())
    }
}

/// Refused retry. No attempt was created.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("Document has no attempts: {0}")]
    DocumentNotFound(String),

    #[error("Attempt {attempt_id} is {status}; only failed attempts can be retried")]
    NotRetryable {
        attempt_id: String,
        status: AttemptStatus,
    },

    #[error("Attempt {attempt_id} was superseded by {latest_id}")]
    Superseded {
        attempt_id: String,
        latest_id: String,
    },

    #[error("Retry limit exceeded for document {document_id} ({max_retries} retries)")]
    RetryLimitExceeded {
        document_id: String,
        max_retries: u32,
    },

    #[error("Rate limited: {limit} extractions already in flight")]
    RateLimited { limit: usize },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for RetryError {
    fn from(err: StoreError) -> Self {
        RetryError::InternalError(err.to_string())
    }
}

/// Why a run ended in `failed`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StageFailure {
    pub kind: FailureKind,
    pub stage: ExtractionStage,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: FailureKind, stage: ExtractionStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }

    pub fn from_text(err: &TextError) -> Self {
        let kind = match err {
            TextError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            TextError::TransientProviderError(_) => FailureKind::TransientProvider,
            TextError::NotFound(_) | TextError::Corrupted(_) | TextError::Io(_) => {
                FailureKind::Storage
            }
            TextError::ToolNotFound(_) | TextError::Internal(_) => FailureKind::Internal,
        };
        Self::new(kind, ExtractionStage::TextExtraction, err.to_string())
    }

    pub fn from_ai(err: &AiError) -> Self {
        let kind = match err {
            AiError::ProviderTimeout(_) => FailureKind::ProviderTimeout,
            AiError::ProviderError(_) => FailureKind::ProviderError,
            AiError::RateLimited { .. } => FailureKind::RateLimited,
        };
        Self::new(kind, ExtractionStage::AiExtraction, err.to_string())
    }

    pub fn from_merge(err: &MergeError) -> Self {
        let kind = match err {
            MergeError::InvalidConfidence { .. } => FailureKind::InvalidConfidence,
            MergeError::UnknownField(_) => FailureKind::UnknownField,
        };
        Self::new(kind, ExtractionStage::Merge, err.to_string())
    }

    pub fn from_store(err: &StoreError, stage: ExtractionStage) -> Self {
        Self::new(FailureKind::Storage, stage, err.to_string())
    }
}
