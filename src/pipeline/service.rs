//! Extraction service: trigger, retry and status queries.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::info;

use super::error::{RetryError, TriggerError};
use super::events::{EventBus, ExtractionEvent};
use super::runner::Engine;
use crate::config::ExtractionPolicy;
use crate::extract::{AiExtractor, FieldModel, RawText, RuleExtractor, TextExtractor};
use crate::models::{AttemptStatus, Document, DocumentCategory, DocumentFormat, ExtractionAttempt};
use crate::repository::{AttemptStore, StoreError};
use crate::storage;

/// Request to extract one uploaded document.
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub document_id: String,
    /// `file://` URL or local path of the upload.
    pub storage_ref: String,
    /// Display name; derived from the storage reference when empty.
    pub file_name: String,
    pub mime_type: String,
    pub category: DocumentCategory,
    pub farm_id: Option<String>,
    pub force_ai: bool,
}

/// What a retry refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryTarget {
    Document(String),
    Attempt(String),
}

#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub target: RetryTarget,
    pub force_ai: bool,
}

/// Entry point of the extraction engine.
///
/// Each attempt runs in its own Tokio task that owns the attempt until it
/// reaches a terminal state; dropping the returned id or handle never
/// cancels it.
#[derive(Clone)]
pub struct ExtractionService {
    engine: Arc<Engine>,
    in_flight: Arc<Semaphore>,
    retry_lock: Arc<Mutex<()>>,
}

impl ExtractionService {
    /// Rule-only service; add a model with [`ExtractionService::with_ai_model`].
    pub fn new(
        store: Arc<dyn AttemptStore>,
        text: Arc<dyn TextExtractor>,
        policy: ExtractionPolicy,
    ) -> Self {
        Self {
            engine: Arc::new(Engine {
                store,
                text,
                rules: RuleExtractor::new(),
                ai: None,
                policy,
                events: EventBus::default(),
            }),
            in_flight: Arc::new(Semaphore::new(policy.max_in_flight.max(1))),
            retry_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_ai_model(mut self, model: Arc<dyn FieldModel>) -> Self {
        let engine = Arc::make_mut(&mut self.engine);
        engine.ai = Some(AiExtractor::new(model, &engine.policy));
        self
    }

    /// Share an existing bus, e.g. with a [`crate::review::ReviewService`].
    pub fn with_events(mut self, events: EventBus) -> Self {
        Arc::make_mut(&mut self.engine).events = events;
        self
    }

    pub fn events(&self) -> EventBus {
        self.engine.events.clone()
    }

    pub fn store(&self) -> Arc<dyn AttemptStore> {
        self.engine.store.clone()
    }

    pub fn policy(&self) -> &ExtractionPolicy {
        &self.engine.policy
    }

    pub fn has_ai(&self) -> bool {
        self.engine.ai.is_some()
    }

    /// Push interface over the event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ExtractionEvent> {
        self.engine.events.subscribe()
    }

    /// Start extraction and return the new attempt id without waiting.
    pub async fn trigger(&self, input: ExtractionInput) -> Result<String, TriggerError> {
        let (attempt_id, _handle) = self.start(input).await?;
        Ok(attempt_id)
    }

    /// Start extraction and wait for the terminal attempt.
    pub async fn trigger_and_wait(
        &self,
        input: ExtractionInput,
    ) -> Result<ExtractionAttempt, TriggerError> {
        let (attempt_id, handle) = self.start(input).await?;
        handle
            .await
            .map_err(|e| TriggerError::InternalError(e.to_string()))?;
        self.engine
            .store
            .get_attempt(&attempt_id)
            .await?
            .ok_or_else(|| TriggerError::InternalError(format!("attempt {} vanished", attempt_id)))
    }

    /// Retry the latest failed attempt of a document with a new attempt.
    pub async fn retry(&self, request: RetryRequest) -> Result<String, RetryError> {
        let (attempt_id, _handle) = self.start_retry(request).await?;
        Ok(attempt_id)
    }

    /// Retry and wait for the terminal attempt.
    pub async fn retry_and_wait(
        &self,
        request: RetryRequest,
    ) -> Result<ExtractionAttempt, RetryError> {
        let (attempt_id, handle) = self.start_retry(request).await?;
        handle
            .await
            .map_err(|e| RetryError::InternalError(e.to_string()))?;
        self.engine
            .store
            .get_attempt(&attempt_id)
            .await?
            .ok_or_else(|| RetryError::InternalError(format!("attempt {} vanished", attempt_id)))
    }

    pub async fn latest_attempt(
        &self,
        document_id: &str,
    ) -> Result<Option<ExtractionAttempt>, StoreError> {
        self.engine.store.latest_attempt(document_id).await
    }

    pub async fn attempt(&self, attempt_id: &str) -> Result<Option<ExtractionAttempt>, StoreError> {
        self.engine.store.get_attempt(attempt_id).await
    }

    pub async fn attempts_for(
        &self,
        document_id: &str,
    ) -> Result<Vec<ExtractionAttempt>, StoreError> {
        self.engine.store.attempts_for(document_id).await
    }

    pub async fn document(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        self.engine.store.get_document(document_id).await
    }

    async fn start(
        &self,
        input: ExtractionInput,
    ) -> Result<(String, JoinHandle<()>), TriggerError> {
        let format = validate(&input)?;
        let permit = self.acquire().ok_or(TriggerError::RateLimited {
            limit: self.engine.policy.max_in_flight,
        })?;
        // Shares the retry lock so a trigger cannot race a retry's cap check.
        let _guard = self.retry_lock.lock().await;
        if let Some(latest) = self.engine.store.latest_attempt(&input.document_id).await? {
            return Err(TriggerError::ValidationError(format!(
                "document {} already has attempt {} ({}); retry it or upload under a new id",
                input.document_id, latest.id, latest.status
            )));
        }
        let document = self.register_document(&input, format).await?;

        let attempt = ExtractionAttempt::new(&document.id, 0, input.force_ai);
        self.engine.store.insert_attempt(&attempt).await?;
        info!(
            "Triggered extraction of {} ({}) as attempt {}",
            document.id, document.file_name, attempt.id
        );
        Ok(self.spawn(attempt, document, None, permit))
    }

    async fn start_retry(
        &self,
        request: RetryRequest,
    ) -> Result<(String, JoinHandle<()>), RetryError> {
        let store = &self.engine.store;
        // Serializes check-then-insert so two retries cannot both pass.
        let _guard = self.retry_lock.lock().await;

        let (document_id, requested) = match &request.target {
            RetryTarget::Attempt(id) => {
                let attempt = store
                    .get_attempt(id)
                    .await?
                    .ok_or_else(|| RetryError::AttemptNotFound(id.clone()))?;
                (attempt.document_id, Some(attempt.id))
            }
            RetryTarget::Document(id) => (id.clone(), None),
        };

        let latest = store
            .latest_attempt(&document_id)
            .await?
            .ok_or_else(|| RetryError::DocumentNotFound(document_id.clone()))?;
        if let Some(requested) = requested {
            if requested != latest.id {
                return Err(RetryError::Superseded {
                    attempt_id: requested,
                    latest_id: latest.id,
                });
            }
        }
        if latest.status != AttemptStatus::Failed {
            return Err(RetryError::NotRetryable {
                attempt_id: latest.id,
                status: latest.status,
            });
        }

        let max_retries = self.engine.policy.max_retries;
        let retry_count = latest.retry_count + 1;
        if retry_count > max_retries as i32 {
            return Err(RetryError::RetryLimitExceeded {
                document_id,
                max_retries,
            });
        }

        let document = store
            .get_document(&document_id)
            .await?
            .ok_or_else(|| RetryError::DocumentNotFound(document_id.clone()))?;
        let permit = self.acquire().ok_or(RetryError::RateLimited {
            limit: self.engine.policy.max_in_flight,
        })?;

        let cached: Option<RawText> = match latest.failed_stage {
            Some(stage) if stage.reuses_text() => store.cached_text(&document_id).await?,
            _ => None,
        };

        let attempt = ExtractionAttempt::new(&document_id, retry_count, request.force_ai);
        store.insert_attempt(&attempt).await?;
        info!(
            "Retrying document {} as attempt {} (retry {}/{}{})",
            document_id,
            attempt.id,
            retry_count,
            max_retries,
            if cached.is_some() { ", cached text" } else { "" }
        );
        Ok(self.spawn(attempt, document, cached, permit))
    }

    fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.in_flight.clone().try_acquire_owned().ok()
    }

    async fn register_document(
        &self,
        input: &ExtractionInput,
        format: DocumentFormat,
    ) -> Result<Document, TriggerError> {
        let store = &self.engine.store;
        if let Some(existing) = store.get_document(&input.document_id).await? {
            if existing.storage_ref != input.storage_ref {
                return Err(TriggerError::ValidationError(format!(
                    "document {} is already registered with storage reference {}",
                    existing.id, existing.storage_ref
                )));
            }
            return Ok(existing);
        }

        let file_name = if input.file_name.trim().is_empty() {
            derive_file_name(&input.storage_ref)
        } else {
            input.file_name.trim().to_string()
        };
        let document = Document::new(
            input.document_id.clone(),
            input.storage_ref.clone(),
            file_name,
            format,
            input.category,
            input.farm_id.clone(),
        );
        store.insert_document(&document).await?;
        Ok(document)
    }

    fn spawn(
        &self,
        attempt: ExtractionAttempt,
        document: Document,
        cached: Option<RawText>,
        permit: OwnedSemaphorePermit,
    ) -> (String, JoinHandle<()>) {
        let attempt_id = attempt.id.clone();
        self.engine.events.publish(ExtractionEvent::AttemptCreated {
            document_id: attempt.document_id.clone(),
            attempt_id: attempt_id.clone(),
            retry_count: attempt.retry_count,
        });

        let engine = self.engine.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            engine.run(attempt, document, cached).await;
        });
        (attempt_id, handle)
    }
}

fn validate(input: &ExtractionInput) -> Result<DocumentFormat, TriggerError> {
    if input.document_id.trim().is_empty() {
        return Err(TriggerError::ValidationError(
            "document id is required".to_string(),
        ));
    }
    storage::resolve(&input.storage_ref)
        .map_err(|e| TriggerError::ValidationError(e.to_string()))?;
    DocumentFormat::from_mime(&input.mime_type).ok_or_else(|| {
        TriggerError::ValidationError(format!("unsupported MIME type: {}", input.mime_type))
    })
}

fn derive_file_name(storage_ref: &str) -> String {
    storage::resolve(storage_ref)
        .ok()
        .and_then(|path| {
            Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| storage_ref.to_string())
}
