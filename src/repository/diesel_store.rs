//! SQLite-backed attempt store using Diesel.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use super::models::{DocumentRecord, DocumentTextRecord, ExtractionAttemptRecord, ReviewRecordRow};
use super::pool::{DbPool, DieselError};
use super::util::format_datetime;
use super::{AttemptStore, StoreError};
use crate::extract::RawText;
use crate::models::{Document, ExtractionAttempt, ReviewRecord};
use crate::schema::{document_texts, documents, extraction_attempts, review_records};
use crate::with_conn;

/// Diesel-based attempt store.
#[derive(Clone)]
pub struct DieselAttemptStore {
    pool: DbPool,
}

impl DieselAttemptStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Store for a database URL (`sqlite:` prefix optional).
    pub fn from_url(url: &str) -> Result<Self, DieselError> {
        Ok(Self::new(DbPool::from_url(url)?))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn convert_attempts(
    records: Vec<ExtractionAttemptRecord>,
) -> Result<Vec<ExtractionAttempt>, StoreError> {
    records
        .into_iter()
        .map(|r| ExtractionAttempt::try_from(r).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl AttemptStore for DieselAttemptStore {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let record = DocumentRecord::from(document);
        with_conn!(self.pool, conn => {
            diesel::insert_or_ignore_into(documents::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let record: Option<DocumentRecord> = with_conn!(self.pool, conn => {
            documents::table
                .find(id)
                .select(DocumentRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(record.map(Document::try_from).transpose()?)
    }

    async fn insert_attempt(&self, attempt: &ExtractionAttempt) -> Result<(), StoreError> {
        let record = ExtractionAttemptRecord::try_from(attempt)?;
        with_conn!(self.pool, conn => {
            diesel::insert_into(extraction_attempts::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    async fn update_attempt(&self, attempt: &mut ExtractionAttempt) -> Result<(), StoreError> {
        let expected = attempt.revision;
        let mut record = ExtractionAttemptRecord::try_from(&*attempt)?;
        record.revision = expected + 1;

        let rows = with_conn!(self.pool, conn => {
            diesel::update(
                extraction_attempts::table
                    .filter(extraction_attempts::id.eq(&attempt.id))
                    .filter(extraction_attempts::revision.eq(expected)),
            )
            .set(&record)
            .execute(&mut conn)
            .await
        })?;

        if rows == 0 {
            return Err(StoreError::Conflict {
                attempt_id: attempt.id.clone(),
                expected,
            });
        }
        attempt.revision = expected + 1;
        Ok(())
    }

    async fn get_attempt(&self, id: &str) -> Result<Option<ExtractionAttempt>, StoreError> {
        let record: Option<ExtractionAttemptRecord> = with_conn!(self.pool, conn => {
            extraction_attempts::table
                .find(id)
                .select(ExtractionAttemptRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(record.map(ExtractionAttempt::try_from).transpose()?)
    }

    async fn attempts_for(
        &self,
        document_id: &str,
    ) -> Result<Vec<ExtractionAttempt>, StoreError> {
        let records: Vec<ExtractionAttemptRecord> = with_conn!(self.pool, conn => {
            extraction_attempts::table
                .filter(extraction_attempts::document_id.eq(document_id))
                .order((
                    extraction_attempts::created_at.asc(),
                    extraction_attempts::retry_count.asc(),
                ))
                .select(ExtractionAttemptRecord::as_select())
                .load(&mut conn)
                .await
        })?;
        convert_attempts(records)
    }

    async fn latest_attempt(
        &self,
        document_id: &str,
    ) -> Result<Option<ExtractionAttempt>, StoreError> {
        let record: Option<ExtractionAttemptRecord> = with_conn!(self.pool, conn => {
            extraction_attempts::table
                .filter(extraction_attempts::document_id.eq(document_id))
                .order((
                    extraction_attempts::created_at.desc(),
                    extraction_attempts::retry_count.desc(),
                ))
                .select(ExtractionAttemptRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(record.map(ExtractionAttempt::try_from).transpose()?)
    }

    async fn save_review(
        &self,
        attempt: &mut ExtractionAttempt,
        record: &ReviewRecord,
    ) -> Result<(), StoreError> {
        let expected = attempt.revision;
        let mut attempt_row = ExtractionAttemptRecord::try_from(&*attempt)?;
        attempt_row.revision = expected + 1;
        let review_row = ReviewRecordRow::try_from(record)?;
        let attempt_id = attempt.id.as_str();
        let document_id = attempt.document_id.as_str();

        with_conn!(self.pool, conn => {
            conn.transaction::<_, StoreError, _>(|conn| {
                Box::pin(async move {
                    let latest: Option<String> = extraction_attempts::table
                        .filter(extraction_attempts::document_id.eq(document_id))
                        .order((
                            extraction_attempts::created_at.desc(),
                            extraction_attempts::retry_count.desc(),
                        ))
                        .select(extraction_attempts::id)
                        .first(conn)
                        .await
                        .optional()?;
                    if latest.as_deref() != Some(attempt_id) {
                        return Err(StoreError::Superseded(attempt_id.to_string()));
                    }

                    let rows = diesel::update(
                        extraction_attempts::table
                            .filter(extraction_attempts::id.eq(attempt_id))
                            .filter(extraction_attempts::revision.eq(expected)),
                    )
                    .set(&attempt_row)
                    .execute(conn)
                    .await?;
                    if rows == 0 {
                        return Err(StoreError::Conflict {
                            attempt_id: attempt_id.to_string(),
                            expected,
                        });
                    }

                    diesel::insert_into(review_records::table)
                        .values(&review_row)
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .await
        })?;

        debug!("Saved review {} for attempt {}", record.id, attempt.id);
        attempt.revision = expected + 1;
        Ok(())
    }

    async fn reviews_for(&self, attempt_id: &str) -> Result<Vec<ReviewRecord>, StoreError> {
        let rows: Vec<ReviewRecordRow> = with_conn!(self.pool, conn => {
            review_records::table
                .filter(review_records::attempt_id.eq(attempt_id))
                .order(review_records::created_at.asc())
                .select(ReviewRecordRow::as_select())
                .load(&mut conn)
                .await
        })?;
        rows.into_iter()
            .map(|r| ReviewRecord::try_from(r).map_err(StoreError::from))
            .collect()
    }

    async fn save_text(&self, document_id: &str, text: &RawText) -> Result<(), StoreError> {
        let record = DocumentTextRecord {
            document_id: document_id.to_string(),
            text: text.text.clone(),
            page_count: i32::try_from(text.page_count).unwrap_or(i32::MAX),
            tables: serde_json::to_string(&text.tables)
                .map_err(|e| DieselError::SerializationError(Box::new(e)))?,
            created_at: format_datetime(&Utc::now()),
        };
        with_conn!(self.pool, conn => {
            diesel::replace_into(document_texts::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    async fn cached_text(&self, document_id: &str) -> Result<Option<RawText>, StoreError> {
        let record: Option<DocumentTextRecord> = with_conn!(self.pool, conn => {
            document_texts::table
                .find(document_id)
                .select(DocumentTextRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(record.map(RawText::try_from).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AttemptStatus, CanonicalField, DocumentCategory, DocumentFormat, ExtractedField,
        FieldMap, FieldSource, FieldValue,
    };
    use crate::repository::migrations::run_migrations;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DieselAttemptStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite:{}", db_path.display());
        run_migrations(&url).await.unwrap();
        (DieselAttemptStore::from_url(&url).unwrap(), dir)
    }

    fn document(id: &str) -> Document {
        Document::new(
            id.to_string(),
            "file:///uploads/application.pdf".to_string(),
            "application.pdf".to_string(),
            DocumentFormat::Pdf,
            DocumentCategory::SubsidyApplication,
            Some("farm-7".to_string()),
        )
    }

    fn completed_attempt(document_id: &str) -> ExtractionAttempt {
        let mut attempt = ExtractionAttempt::new(document_id, 0, false);
        attempt.start().unwrap();
        let mut fields = FieldMap::new();
        fields.insert(
            CanonicalField::FarmName.into(),
            ExtractedField {
                value: FieldValue::Text("Green Acres".into()),
                confidence: 0.8,
                source: FieldSource::RuleBased,
            },
        );
        attempt
            .complete(fields, 0.8, crate::models::ExtractionSource::RuleBased)
            .unwrap();
        attempt
    }

    #[tokio::test]
    async fn test_document_round_trip_and_duplicate_insert() {
        let (store, _dir) = setup_test_db().await;
        let doc = document("doc-1");
        store.insert_document(&doc).await.unwrap();
        store.insert_document(&doc).await.unwrap();

        let loaded = store.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.format, DocumentFormat::Pdf);
        assert_eq!(loaded.category, DocumentCategory::SubsidyApplication);
        assert_eq!(loaded.farm_id.as_deref(), Some("farm-7"));
        assert!(store.get_document("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_is_compare_and_set() {
        let (store, _dir) = setup_test_db().await;
        store.insert_document(&document("doc-1")).await.unwrap();

        let mut attempt = ExtractionAttempt::new("doc-1", 0, false);
        store.insert_attempt(&attempt).await.unwrap();
        let mut stale = attempt.clone();

        attempt.start().unwrap();
        store.update_attempt(&mut attempt).await.unwrap();
        assert_eq!(attempt.revision, 1);

        stale.start().unwrap();
        let err = store.update_attempt(&mut stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 0, .. }));

        let loaded = store.get_attempt(&attempt.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AttemptStatus::Processing);
        assert_eq!(loaded.revision, 1);
    }

    #[tokio::test]
    async fn test_latest_attempt_orders_by_creation_then_retry_count() {
        let (store, _dir) = setup_test_db().await;
        store.insert_document(&document("doc-1")).await.unwrap();

        let first = ExtractionAttempt::new("doc-1", 0, false);
        let mut second = ExtractionAttempt::new("doc-1", 1, false);
        second.created_at = first.created_at;
        store.insert_attempt(&second).await.unwrap();
        store.insert_attempt(&first).await.unwrap();

        let latest = store.latest_attempt("doc-1").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        let all = store.attempts_for("doc-1").await.unwrap();
        let ids: Vec<&str> = all.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
    }

    #[tokio::test]
    async fn test_save_review_is_atomic_and_checks_supersession() {
        let (store, _dir) = setup_test_db().await;
        store.insert_document(&document("doc-1")).await.unwrap();

        let mut attempt = completed_attempt("doc-1");
        store.insert_attempt(&attempt).await.unwrap();

        let original = attempt.fields.clone();
        let mut corrections = BTreeMap::new();
        corrections.insert(
            CanonicalField::FarmName.into(),
            FieldValue::Text("Green Acres Farm".into()),
        );
        attempt.apply_review(&corrections).unwrap();
        let record = ReviewRecord::new(
            &attempt.id,
            "reviewer-1",
            original,
            attempt.fields.clone(),
            Some("typo".into()),
        );
        store.save_review(&mut attempt, &record).await.unwrap();

        let history = store.reviews_for(&attempt.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reviewer_id, "reviewer-1");
        assert_eq!(history[0].corrected_data, attempt.fields);

        // A newer attempt supersedes the reviewed one; nothing is written.
        let mut newer = ExtractionAttempt::new("doc-1", 1, false);
        newer.created_at = attempt.created_at + chrono::Duration::seconds(1);
        store.insert_attempt(&newer).await.unwrap();

        let record = ReviewRecord::new(
            &attempt.id,
            "reviewer-2",
            FieldMap::new(),
            FieldMap::new(),
            None,
        );
        let err = store.save_review(&mut attempt, &record).await.unwrap_err();
        assert!(matches!(err, StoreError::Superseded(_)));
        assert_eq!(store.reviews_for(&attempt.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_field_values_keep_their_type() {
        let (store, _dir) = setup_test_db().await;
        store.insert_document(&document("doc-1")).await.unwrap();

        let mut attempt = ExtractionAttempt::new("doc-1", 0, false);
        attempt.start().unwrap();
        let field = |value| ExtractedField {
            value,
            confidence: 0.7,
            source: FieldSource::AiBased,
        };
        let mut fields = FieldMap::new();
        fields.insert(
            CanonicalField::RegistrationNumber.into(),
            field(FieldValue::Text("2024-03-15".into())),
        );
        fields.insert(
            CanonicalField::ApplicationDate.into(),
            field(FieldValue::Date(
                chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            )),
        );
        fields.insert(
            CanonicalField::LivestockCount.into(),
            field(FieldValue::Integer(42)),
        );
        attempt
            .complete(fields, 0.7, crate::models::ExtractionSource::AiBased)
            .unwrap();
        store.insert_attempt(&attempt).await.unwrap();

        let loaded = store.get_attempt(&attempt.id).await.unwrap().unwrap();
        assert_eq!(loaded.fields, attempt.fields);
    }

    #[tokio::test]
    async fn test_text_cache() {
        let (store, _dir) = setup_test_db().await;
        store.insert_document(&document("doc-1")).await.unwrap();
        assert!(store.cached_text("doc-1").await.unwrap().is_none());

        let mut text = RawText::new("Farm Name: Green Acres", 2);
        text.tables.push(crate::extract::TableHint {
            page: 1,
            rows: 3,
            columns: 2,
        });
        store.save_text("doc-1", &text).await.unwrap();
        store.save_text("doc-1", &text).await.unwrap();

        assert_eq!(store.cached_text("doc-1").await.unwrap(), Some(text));
    }
}
