//! Diesel records for the database tables and their domain conversions.

use diesel::prelude::*;

use super::util::{format_datetime, invalid_column, parse_datetime, parse_datetime_opt};
use crate::extract::RawText;
use crate::models::{
    restore_kinds, AttemptStatus, Document, DocumentCategory, DocumentFormat, ExtractionAttempt,
    ExtractionSource, ExtractionStage, FailureKind, FieldMap, ReviewRecord,
};
use crate::schema;

/// Document row.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRecord {
    pub id: String,
    pub storage_ref: String,
    pub file_name: String,
    pub mime_type: String,
    pub category: String,
    pub farm_id: Option<String>,
    pub created_at: String,
}

impl From<&Document> for DocumentRecord {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            storage_ref: doc.storage_ref.clone(),
            file_name: doc.file_name.clone(),
            mime_type: doc.format.mime_type().to_string(),
            category: doc.category.as_str().to_string(),
            farm_id: doc.farm_id.clone(),
            created_at: format_datetime(&doc.created_at),
        }
    }
}

impl TryFrom<DocumentRecord> for Document {
    type Error = diesel::result::Error;

    fn try_from(record: DocumentRecord) -> Result<Self, Self::Error> {
        let format = DocumentFormat::from_mime(&record.mime_type)
            .ok_or_else(|| invalid_column("mime type", &record.mime_type, &record.id))?;
        Ok(Document {
            format,
            category: DocumentCategory::parse_or_other(&record.category),
            created_at: parse_datetime(&record.created_at),
            id: record.id,
            storage_ref: record.storage_ref,
            file_name: record.file_name,
            farm_id: record.farm_id,
        })
    }
}

/// Extraction attempt row. Also used as the changeset for updates.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = schema::extraction_attempts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct ExtractionAttemptRecord {
    pub id: String,
    pub document_id: String,
    pub status: String,
    pub stage: Option<String>,
    pub source: String,
    pub confidence: f64,
    pub fields: String,
    pub field_sources: String,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub failed_stage: Option<String>,
    pub retry_count: i32,
    pub force_ai: bool,
    pub low_content: bool,
    pub needs_review: bool,
    pub revision: i32,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<&ExtractionAttempt> for ExtractionAttemptRecord {
    type Error = diesel::result::Error;

    fn try_from(attempt: &ExtractionAttempt) -> Result<Self, Self::Error> {
        let fields = serde_json::to_string(&attempt.fields)
            .map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))?;
        let field_sources = serde_json::to_string(&attempt.field_sources())
            .map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))?;

        Ok(Self {
            id: attempt.id.clone(),
            document_id: attempt.document_id.clone(),
            status: attempt.status.as_str().to_string(),
            stage: attempt.stage.map(|s| s.as_str().to_string()),
            source: attempt.source.as_str().to_string(),
            confidence: attempt.confidence,
            fields,
            field_sources,
            error_message: attempt.error_message.clone(),
            error_kind: attempt.error_kind.map(|k| k.as_str().to_string()),
            failed_stage: attempt.failed_stage.map(|s| s.as_str().to_string()),
            retry_count: attempt.retry_count,
            force_ai: attempt.force_ai,
            low_content: attempt.low_content,
            needs_review: attempt.needs_review,
            revision: attempt.revision,
            started_at: attempt.started_at.as_ref().map(format_datetime),
            completed_at: attempt.completed_at.as_ref().map(format_datetime),
            created_at: format_datetime(&attempt.created_at),
            updated_at: format_datetime(&attempt.updated_at),
        })
    }
}

fn parse_stage(
    value: Option<&str>,
    id: &str,
) -> Result<Option<ExtractionStage>, diesel::result::Error> {
    value
        .map(|s| ExtractionStage::from_str(s).ok_or_else(|| invalid_column("stage", s, id)))
        .transpose()
}

impl TryFrom<ExtractionAttemptRecord> for ExtractionAttempt {
    type Error = diesel::result::Error;

    fn try_from(record: ExtractionAttemptRecord) -> Result<Self, Self::Error> {
        let status = AttemptStatus::from_str(&record.status)
            .ok_or_else(|| invalid_column("status", &record.status, &record.id))?;
        let source = ExtractionSource::from_str(&record.source)
            .ok_or_else(|| invalid_column("source", &record.source, &record.id))?;
        let stage = parse_stage(record.stage.as_deref(), &record.id)?;
        let failed_stage = parse_stage(record.failed_stage.as_deref(), &record.id)?;
        let error_kind = record
            .error_kind
            .as_deref()
            .map(|k| {
                FailureKind::from_str(k).ok_or_else(|| invalid_column("error kind", k, &record.id))
            })
            .transpose()?;
        let mut fields: FieldMap = serde_json::from_str(&record.fields).map_err(|e| {
            diesel::result::Error::DeserializationError(
                format!("Invalid fields JSON for attempt '{}': {}", record.id, e).into(),
            )
        })?;
        restore_kinds(&mut fields);

        Ok(ExtractionAttempt {
            status,
            stage,
            source,
            confidence: record.confidence,
            fields,
            error_message: record.error_message,
            error_kind,
            failed_stage,
            retry_count: record.retry_count,
            force_ai: record.force_ai,
            low_content: record.low_content,
            needs_review: record.needs_review,
            revision: record.revision,
            started_at: parse_datetime_opt(record.started_at),
            completed_at: parse_datetime_opt(record.completed_at),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
            id: record.id,
            document_id: record.document_id,
        })
    }
}

/// Review audit row. Insert-only.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::review_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ReviewRecordRow {
    pub id: String,
    pub attempt_id: String,
    pub reviewer_id: String,
    pub original_data: String,
    pub corrected_data: String,
    pub notes: Option<String>,
    pub created_at: String,
}

impl TryFrom<&ReviewRecord> for ReviewRecordRow {
    type Error = diesel::result::Error;

    fn try_from(review: &ReviewRecord) -> Result<Self, Self::Error> {
        let to_json = |map: &FieldMap| {
            serde_json::to_string(map)
                .map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))
        };
        Ok(Self {
            id: review.id.clone(),
            attempt_id: review.attempt_id.clone(),
            reviewer_id: review.reviewer_id.clone(),
            original_data: to_json(&review.original_data)?,
            corrected_data: to_json(&review.corrected_data)?,
            notes: review.notes.clone(),
            created_at: format_datetime(&review.created_at),
        })
    }
}

impl TryFrom<ReviewRecordRow> for ReviewRecord {
    type Error = diesel::result::Error;

    fn try_from(row: ReviewRecordRow) -> Result<Self, Self::Error> {
        let from_json = |raw: &str, what: &str| -> Result<FieldMap, diesel::result::Error> {
            let mut fields: FieldMap = serde_json::from_str(raw).map_err(|e| {
                diesel::result::Error::DeserializationError(
                    format!("Invalid {} JSON for review '{}': {}", what, row.id, e).into(),
                )
            })?;
            restore_kinds(&mut fields);
            Ok(fields)
        };
        Ok(ReviewRecord {
            original_data: from_json(&row.original_data, "original_data")?,
            corrected_data: from_json(&row.corrected_data, "corrected_data")?,
            created_at: parse_datetime(&row.created_at),
            id: row.id.clone(),
            attempt_id: row.attempt_id,
            reviewer_id: row.reviewer_id,
            notes: row.notes,
        })
    }
}

/// Cached adapter output for a document.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::document_texts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentTextRecord {
    pub document_id: String,
    pub text: String,
    pub page_count: i32,
    pub tables: String,
    pub created_at: String,
}

impl TryFrom<DocumentTextRecord> for RawText {
    type Error = diesel::result::Error;

    fn try_from(record: DocumentTextRecord) -> Result<Self, Self::Error> {
        let tables = serde_json::from_str(&record.tables).map_err(|e| {
            diesel::result::Error::DeserializationError(
                format!("Invalid tables JSON for document '{}': {}", record.document_id, e).into(),
            )
        })?;
        Ok(RawText {
            text: record.text,
            page_count: u32::try_from(record.page_count).unwrap_or(0),
            tables,
        })
    }
}
