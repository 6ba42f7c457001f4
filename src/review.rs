//! Review/correction layer.
//!
//! A reviewer overrides field values on a finished attempt. Overridden
//! fields become `manual`, and every correction appends an immutable
//! [`ReviewRecord`] with before and after snapshots. The reviewer identity
//! is always passed in explicitly.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::models::{AttemptStatus, FieldName, FieldNameError, FieldValue, ReviewRecord};
use crate::pipeline::{EventBus, ExtractionEvent};
use crate::repository::{AttemptStore, StoreError};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("Attempt {attempt_id} is {status} and cannot be reviewed yet")]
    NotReviewable {
        attempt_id: String,
        status: AttemptStatus,
    },

    /// Retried, superseded or edited since it was read. Re-fetch and retry.
    #[error("Attempt {0} was modified concurrently; reload it and try again")]
    ConcurrentModification(String),

    #[error(transparent)]
    UnknownField(#[from] FieldNameError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for ReviewError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { attempt_id, .. } | StoreError::Superseded(attempt_id) => {
                ReviewError::ConcurrentModification(attempt_id)
            }
            StoreError::NotFound(id) => ReviewError::AttemptNotFound(id),
            other => ReviewError::InternalError(other.to_string()),
        }
    }
}

/// Parse `name=value` style corrections, typing values by field.
pub fn parse_corrections<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<BTreeMap<FieldName, FieldValue>, ReviewError> {
    pairs
        .into_iter()
        .map(|(name, raw)| {
            let name = FieldName::parse(name)?;
            let value = FieldValue::coerce(name.kind(), raw);
            Ok::<_, ReviewError>((name, value))
        })
        .collect()
}

#[derive(Clone)]
pub struct ReviewService {
    store: Arc<dyn AttemptStore>,
    events: EventBus,
}

impl ReviewService {
    pub fn new(store: Arc<dyn AttemptStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Apply corrections to an attempt and append the audit record.
    pub async fn submit_correction(
        &self,
        attempt_id: &str,
        corrected_fields: BTreeMap<FieldName, FieldValue>,
        reviewer_id: &str,
        notes: Option<String>,
    ) -> Result<ReviewRecord, ReviewError> {
        let reviewer_id = reviewer_id.trim();
        if reviewer_id.is_empty() {
            return Err(ReviewError::ValidationError(
                "reviewer id is required".to_string(),
            ));
        }
        if corrected_fields.is_empty() {
            return Err(ReviewError::ValidationError(
                "no corrected fields given".to_string(),
            ));
        }

        let mut attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| ReviewError::AttemptNotFound(attempt_id.to_string()))?;

        if !attempt.is_reviewable() {
            return Err(ReviewError::NotReviewable {
                attempt_id: attempt.id,
                status: attempt.status,
            });
        }

        let latest = self.store.latest_attempt(&attempt.document_id).await?;
        if latest.map(|a| a.id).as_deref() != Some(attempt.id.as_str()) {
            return Err(ReviewError::ConcurrentModification(attempt.id));
        }

        let original = attempt.fields.clone();
        attempt
            .apply_review(&corrected_fields)
            .map_err(|_| ReviewError::NotReviewable {
                attempt_id: attempt.id.clone(),
                status: attempt.status,
            })?;

        let record = ReviewRecord::new(
            &attempt.id,
            reviewer_id,
            original,
            attempt.fields.clone(),
            notes.filter(|n| !n.trim().is_empty()),
        );
        self.store.save_review(&mut attempt, &record).await?;

        info!(
            "Reviewer {} corrected {} field(s) on attempt {}",
            reviewer_id,
            corrected_fields.len(),
            attempt.id
        );
        self.events.publish(ExtractionEvent::Reviewed {
            document_id: attempt.document_id.clone(),
            attempt_id: attempt.id.clone(),
            review_id: record.id.clone(),
        });
        Ok(record)
    }

    /// Review records for an attempt, oldest first.
    pub async fn history(&self, attempt_id: &str) -> Result<Vec<ReviewRecord>, ReviewError> {
        if self.store.get_attempt(attempt_id).await?.is_none() {
            return Err(ReviewError::AttemptNotFound(attempt_id.to_string()));
        }
        Ok(self.store.reviews_for(attempt_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CanonicalField, Document, DocumentCategory, DocumentFormat, ExtractedField,
        ExtractionAttempt, ExtractionSource, FieldMap, FieldSource,
    };
    use crate::repository::MemoryAttemptStore;

    async fn setup(status: AttemptStatus) -> (ReviewService, Arc<MemoryAttemptStore>, String) {
        let store = Arc::new(MemoryAttemptStore::new());
        store
            .insert_document(&Document::new(
                "doc-1".into(),
                "/uploads/form.pdf".into(),
                "form.pdf".into(),
                DocumentFormat::Pdf,
                DocumentCategory::FarmRegistration,
                None,
            ))
            .await
            .unwrap();

        let mut attempt = ExtractionAttempt::new("doc-1", 0, false);
        if status != AttemptStatus::Pending {
            attempt.start().unwrap();
        }
        if status == AttemptStatus::Completed {
            let mut fields = FieldMap::new();
            fields.insert(
                CanonicalField::FarmName.into(),
                ExtractedField {
                    value: FieldValue::Text("Green Acres".into()),
                    confidence: 0.8,
                    source: FieldSource::RuleBased,
                },
            );
            attempt.complete(fields, 0.8, ExtractionSource::RuleBased).unwrap();
        }
        store.insert_attempt(&attempt).await.unwrap();

        let service = ReviewService::new(store.clone(), EventBus::default());
        (service, store, attempt.id)
    }

    fn farm_name(value: &str) -> BTreeMap<FieldName, FieldValue> {
        let mut map = BTreeMap::new();
        map.insert(
            FieldName::from(CanonicalField::FarmName),
            FieldValue::Text(value.into()),
        );
        map
    }

    #[tokio::test]
    async fn test_correction_records_snapshots() {
        let (service, store, attempt_id) = setup(AttemptStatus::Completed).await;

        let record = service
            .submit_correction(&attempt_id, farm_name("Green Acres Farm"), "rev-1", None)
            .await
            .unwrap();

        let key = FieldName::from(CanonicalField::FarmName);
        assert_eq!(
            record.original_data[&key].value,
            FieldValue::Text("Green Acres".into())
        );
        assert_eq!(
            record.corrected_data[&key].value,
            FieldValue::Text("Green Acres Farm".into())
        );

        let attempt = store.get_attempt(&attempt_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, AttemptStatus::Reviewed);
        assert_eq!(attempt.fields[&key].source, FieldSource::Manual);
        assert_eq!(attempt.source, ExtractionSource::Manual);
        assert_eq!(attempt.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_re_review_appends() {
        let (service, _store, attempt_id) = setup(AttemptStatus::Completed).await;
        service
            .submit_correction(&attempt_id, farm_name("A"), "rev-1", Some("first".into()))
            .await
            .unwrap();
        service
            .submit_correction(&attempt_id, farm_name("B"), "rev-2", None)
            .await
            .unwrap();

        let history = service.history(&attempt_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].reviewer_id, "rev-1");
        assert_eq!(history[0].notes.as_deref(), Some("first"));
        assert_eq!(history[1].original_data, history[0].corrected_data);
    }

    #[tokio::test]
    async fn test_processing_attempt_is_not_reviewable() {
        let (service, _store, attempt_id) = setup(AttemptStatus::Processing).await;
        let err = service
            .submit_correction(&attempt_id, farm_name("x"), "rev-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::NotReviewable { .. }));
    }

    #[tokio::test]
    async fn test_superseded_attempt_is_concurrent_modification() {
        let (service, store, attempt_id) = setup(AttemptStatus::Completed).await;
        let mut newer = ExtractionAttempt::new("doc-1", 1, false);
        newer.created_at += chrono::Duration::seconds(1);
        store.insert_attempt(&newer).await.unwrap();

        let err = service
            .submit_correction(&attempt_id, farm_name("x"), "rev-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::ConcurrentModification(_)));
        assert!(service.history(&attempt_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_attempt_and_bad_input() {
        let (service, _store, attempt_id) = setup(AttemptStatus::Completed).await;
        assert!(matches!(
            service
                .submit_correction("missing", farm_name("x"), "rev-1", None)
                .await,
            Err(ReviewError::AttemptNotFound(_))
        ));
        assert!(matches!(
            service
                .submit_correction(&attempt_id, farm_name("x"), "  ", None)
                .await,
            Err(ReviewError::ValidationError(_))
        ));
        assert!(matches!(
            service.history("missing").await,
            Err(ReviewError::AttemptNotFound(_))
        ));
    }

    #[test]
    fn test_parse_corrections() {
        let parsed =
            parse_corrections([("Farm Name", "Green Acres"), ("livestock_count", "42")]).unwrap();
        assert_eq!(
            parsed[&FieldName::from(CanonicalField::LivestockCount)],
            FieldValue::Integer(42)
        );
        assert!(matches!(
            parse_corrections([("colour", "green")]),
            Err(ReviewError::UnknownField(_))
        ));
    }
}
