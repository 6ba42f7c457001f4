//! Data models for the extraction engine.

mod attempt;
mod document;
mod field;
mod review;

pub use attempt::{
    AttemptRecord, AttemptStatus, ExtractionAttempt, ExtractionSource, ExtractionStage,
    FailureKind, TransitionError,
};
pub use document::{Document, DocumentCategory, DocumentFormat};
pub use field::{
    mean_confidence, restore_kinds, CanonicalField, ExtractedField, FieldCandidate, FieldMap,
    FieldName, FieldNameError, FieldSource, FieldValue, ValueKind, CUSTOM_PREFIX,
};
pub use review::ReviewRecord;
