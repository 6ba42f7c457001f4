use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE documents (
    id TEXT PRIMARY KEY NOT NULL,
    storage_ref TEXT NOT NULL,
    file_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'other',
    farm_id TEXT,
    created_at TEXT NOT NULL
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE extraction_attempts (
    id TEXT PRIMARY KEY NOT NULL,
    document_id TEXT NOT NULL REFERENCES documents(id),
    status TEXT NOT NULL DEFAULT 'pending',
    stage TEXT,
    source TEXT NOT NULL DEFAULT 'rule-based',
    confidence REAL NOT NULL DEFAULT 0,
    fields TEXT NOT NULL DEFAULT '{}',
    field_sources TEXT NOT NULL DEFAULT '{}',
    error_message TEXT,
    error_kind TEXT,
    failed_stage TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    force_ai INTEGER NOT NULL DEFAULT 0,
    low_content INTEGER NOT NULL DEFAULT 0,
    needs_review INTEGER NOT NULL DEFAULT 0,
    revision INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
        ))
        .operation(AddIndex::new(
            "extraction_attempts",
            Index::new("idx_attempts_document")
                .column("document_id")
                .column("created_at")
                .column("retry_count"),
        ))
        .operation(AddIndex::new(
            "extraction_attempts",
            Index::new("idx_attempts_status").column("status"),
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE review_records (
    id TEXT PRIMARY KEY NOT NULL,
    attempt_id TEXT NOT NULL REFERENCES extraction_attempts(id),
    reviewer_id TEXT NOT NULL,
    original_data TEXT NOT NULL,
    corrected_data TEXT NOT NULL,
    notes TEXT,
    created_at TEXT NOT NULL
)"#,
        ))
        .operation(AddIndex::new(
            "review_records",
            Index::new("idx_review_records_attempt")
                .column("attempt_id")
                .column("created_at"),
        ))
}
