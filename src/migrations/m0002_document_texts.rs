use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_document_texts")
        .depends_on(&["0001_initial_schema"])
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE document_texts (
    document_id TEXT PRIMARY KEY NOT NULL REFERENCES documents(id),
    text TEXT NOT NULL,
    page_count INTEGER NOT NULL DEFAULT 0,
    tables TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
)"#,
        ))
}
