//! Repository layer for database persistence.
//!
//! [`AttemptStore`] is the seam between the extraction engine and storage.
//! [`DieselAttemptStore`] persists to SQLite through Diesel;
//! [`MemoryAttemptStore`] keeps everything in process.

pub mod diesel_store;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod util;

use async_trait::async_trait;
use thiserror::Error;

use crate::extract::RawText;
use crate::models::{Document, ExtractionAttempt, ReviewRecord};

pub use diesel_store::DieselAttemptStore;
pub use memory::MemoryAttemptStore;
pub use migrations::run_migrations;
pub use pool::{DbPool, DieselError};
pub use util::{parse_datetime, parse_datetime_opt};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    /// The stored revision moved on since the caller read the attempt.
    #[error("Attempt {attempt_id} was modified concurrently (expected revision {expected})")]
    Conflict { attempt_id: String, expected: i32 },

    /// A newer attempt exists for the same document.
    #[error("Attempt {0} has been superseded by a newer attempt")]
    Superseded(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Persistence operations used by the pipeline and the review layer.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Insert a document; an existing id is left untouched.
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    async fn insert_attempt(&self, attempt: &ExtractionAttempt) -> Result<(), StoreError>;

    /// Compare-and-set update on `revision`.
    ///
    /// Writes only if the stored revision equals `attempt.revision`, then
    /// bumps the revision on both sides.
    async fn update_attempt(&self, attempt: &mut ExtractionAttempt) -> Result<(), StoreError>;

    async fn get_attempt(&self, id: &str) -> Result<Option<ExtractionAttempt>, StoreError>;

    /// All attempts for a document, oldest first.
    async fn attempts_for(&self, document_id: &str)
        -> Result<Vec<ExtractionAttempt>, StoreError>;

    /// Authoritative attempt: greatest `created_at`, then greatest `retry_count`.
    async fn latest_attempt(
        &self,
        document_id: &str,
    ) -> Result<Option<ExtractionAttempt>, StoreError>;

    /// Persist a reviewed attempt and its audit record atomically.
    ///
    /// Fails with `Superseded` if the attempt is no longer the latest for its
    /// document and with `Conflict` if its revision moved on.
    async fn save_review(
        &self,
        attempt: &mut ExtractionAttempt,
        record: &ReviewRecord,
    ) -> Result<(), StoreError>;

    /// Review records for an attempt, oldest first.
    async fn reviews_for(&self, attempt_id: &str) -> Result<Vec<ReviewRecord>, StoreError>;

    /// Cache adapter output so a retry can skip text extraction.
    async fn save_text(&self, document_id: &str, text: &RawText) -> Result<(), StoreError>;

    async fn cached_text(&self, document_id: &str) -> Result<Option<RawText>, StoreError>;
}

/// Ordering key for "latest attempt".
pub(crate) fn is_newer(a: &ExtractionAttempt, b: &ExtractionAttempt) -> bool {
    (a.created_at, a.retry_count) > (b.created_at, b.retry_count)
}
