//! In-process attempt store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{is_newer, AttemptStore, StoreError};
use crate::extract::RawText;
use crate::models::{Document, ExtractionAttempt, ReviewRecord};

#[derive(Default)]
struct Tables {
    documents: HashMap<String, Document>,
    attempts: HashMap<String, ExtractionAttempt>,
    reviews: Vec<ReviewRecord>,
    texts: HashMap<String, RawText>,
}

impl Tables {
    fn latest_for(&self, document_id: &str) -> Option<&ExtractionAttempt> {
        self.attempts
            .values()
            .filter(|a| a.document_id == document_id)
            .fold(None, |best: Option<&ExtractionAttempt>, a| match best {
                Some(b) if !is_newer(a, b) => Some(b),
                _ => Some(a),
            })
    }

    fn compare_and_set(&mut self, attempt: &mut ExtractionAttempt) -> Result<(), StoreError> {
        let stored = self
            .attempts
            .get_mut(&attempt.id)
            .ok_or_else(|| StoreError::NotFound(attempt.id.clone()))?;
        if stored.revision != attempt.revision {
            return Err(StoreError::Conflict {
                attempt_id: attempt.id.clone(),
                expected: attempt.revision,
            });
        }
        attempt.revision += 1;
        *stored = attempt.clone();
        Ok(())
    }
}

/// Attempt store kept in memory; used by tests and embedders.
#[derive(Default)]
pub struct MemoryAttemptStore {
    tables: RwLock<Tables>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .documents
            .entry(document.id.clone())
            .or_insert_with(|| document.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.tables.read().await.documents.get(id).cloned())
    }

    async fn insert_attempt(&self, attempt: &ExtractionAttempt) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.documents.contains_key(&attempt.document_id) {
            return Err(StoreError::NotFound(attempt.document_id.clone()));
        }
        tables.attempts.insert(attempt.id.clone(), attempt.clone());
        Ok(())
    }

    async fn update_attempt(&self, attempt: &mut ExtractionAttempt) -> Result<(), StoreError> {
        self.tables.write().await.compare_and_set(attempt)
    }

    async fn get_attempt(&self, id: &str) -> Result<Option<ExtractionAttempt>, StoreError> {
        Ok(self.tables.read().await.attempts.get(id).cloned())
    }

    async fn attempts_for(
        &self,
        document_id: &str,
    ) -> Result<Vec<ExtractionAttempt>, StoreError> {
        let tables = self.tables.read().await;
        let mut attempts: Vec<ExtractionAttempt> = tables
            .attempts
            .values()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| (a.created_at, a.retry_count));
        Ok(attempts)
    }

    async fn latest_attempt(
        &self,
        document_id: &str,
    ) -> Result<Option<ExtractionAttempt>, StoreError> {
        Ok(self.tables.read().await.latest_for(document_id).cloned())
    }

    async fn save_review(
        &self,
        attempt: &mut ExtractionAttempt,
        record: &ReviewRecord,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let latest_id = tables.latest_for(&attempt.document_id).map(|a| a.id.clone());
        if latest_id.as_deref() != Some(attempt.id.as_str()) {
            return Err(StoreError::Superseded(attempt.id.clone()));
        }
        tables.compare_and_set(attempt)?;
        tables.reviews.push(record.clone());
        Ok(())
    }

    async fn reviews_for(&self, attempt_id: &str) -> Result<Vec<ReviewRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut reviews: Vec<ReviewRecord> = tables
            .reviews
            .iter()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect();
        reviews.sort_by_key(|r| r.created_at);
        Ok(reviews)
    }

    async fn save_text(&self, document_id: &str, text: &RawText) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .texts
            .insert(document_id.to_string(), text.clone());
        Ok(())
    }

    async fn cached_text(&self, document_id: &str) -> Result<Option<RawText>, StoreError> {
        Ok(self.tables.read().await.texts.get(document_id).cloned())
    }
}
