//! Runs one attempt from `pending` to a terminal state.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::error::StageFailure;
use super::events::{EventBus, ExtractionEvent};
use crate::config::{AiMode, ExtractionPolicy};
use crate::extract::{AiExtractor, RawText, RuleExtractor, TextError, TextExtractor};
use crate::merge::merge;
use crate::models::{Document, ExtractionAttempt, ExtractionStage, FailureKind, FieldCandidate};
use crate::rate_limit::backoff_delay;
use crate::repository::AttemptStore;

/// Everything a run needs. Cloned into each spawned task behind an `Arc`.
#[derive(Clone)]
pub(crate) struct Engine {
    pub store: Arc<dyn AttemptStore>,
    pub text: Arc<dyn TextExtractor>,
    pub rules: RuleExtractor,
    pub ai: Option<AiExtractor>,
    pub policy: ExtractionPolicy,
    pub events: EventBus,
}

impl Engine {
    /// Drive the attempt to `completed` or `failed`. Never panics on
    /// extractor or storage errors; they end up on the attempt.
    pub async fn run(
        &self,
        mut attempt: ExtractionAttempt,
        document: Document,
        cached: Option<RawText>,
    ) {
        if let Err(failure) = self.execute(&mut attempt, &document, cached).await {
            self.record_failure(&mut attempt, failure).await;
        }
    }

    async fn execute(
        &self,
        attempt: &mut ExtractionAttempt,
        document: &Document,
        cached: Option<RawText>,
    ) -> Result<(), StageFailure> {
        attempt.start().map_err(|e| {
            StageFailure::new(FailureKind::Internal, ExtractionStage::TextExtraction, e.to_string())
        })?;
        self.persist(attempt, ExtractionStage::TextExtraction).await?;
        info!(
            "Attempt {} for document {} started (retry {})",
            attempt.id, attempt.document_id, attempt.retry_count
        );
        self.progress(attempt, ExtractionStage::TextExtraction);

        let raw = match cached {
            Some(raw) => {
                info!("Reusing cached text for document {}", document.id);
                raw
            }
            None => {
                let raw = self.extract_text(document).await?;
                if let Err(e) = self.store.save_text(&document.id, &raw).await {
                    warn!("Could not cache text for document {}: {}", document.id, e);
                }
                raw
            }
        };

        attempt.low_content = raw.is_low_content(self.policy.min_text_chars);
        if attempt.low_content {
            info!(
                "Document {} has little text ({} chars)",
                document.id,
                raw.char_count()
            );
        }

        self.advance(attempt, ExtractionStage::RuleExtraction).await?;

        let has_text = raw.char_count() > 0;
        let ai_upfront = attempt.force_ai || (self.policy.ai_mode == AiMode::Always && has_text);

        let (rule_candidates, ai_candidates) = match (&self.ai, ai_upfront) {
            (Some(ai), true) => {
                self.advance(attempt, ExtractionStage::AiExtraction).await?;
                let (rules, ai_result) = tokio::join!(
                    async { self.rules.extract(&raw.text, document.category) },
                    ai.extract(&raw.text, document.category),
                );
                (rules, ai_result.map_err(|e| StageFailure::from_ai(&e))?)
            }
            (None, true) if attempt.force_ai => {
                return Err(StageFailure::new(
                    FailureKind::ProviderError,
                    ExtractionStage::AiExtraction,
                    "AI extraction was forced but no model is configured",
                ));
            }
            _ => {
                let rules = self.rules.extract(&raw.text, document.category);
                let escalate =
                    self.ai.is_some() && self.should_escalate(attempt, has_text, &rules)?;
                match (&self.ai, escalate) {
                    (Some(ai), true) => {
                        self.advance(attempt, ExtractionStage::AiExtraction).await?;
                        let found = ai
                            .extract(&raw.text, document.category)
                            .await
                            .map_err(|e| StageFailure::from_ai(&e))?;
                        (rules, found)
                    }
                    _ => (rules, Vec::new()),
                }
            }
        };
        debug!(
            "Attempt {}: {} rule candidates, {} AI candidates",
            attempt.id,
            rule_candidates.len(),
            ai_candidates.len()
        );

        self.advance(attempt, ExtractionStage::Merge).await?;
        let merged =
            merge(&rule_candidates, &ai_candidates).map_err(|e| StageFailure::from_merge(&e))?;

        let mut done = attempt.clone();
        done.complete(merged.fields, merged.aggregate_confidence, merged.source)
            .map_err(|e| {
                StageFailure::new(FailureKind::Internal, ExtractionStage::Merge, e.to_string())
            })?;
        done.needs_review =
            !done.fields.is_empty() && done.confidence < self.policy.review_threshold;
        self.persist(&mut done, ExtractionStage::Merge).await?;
        *attempt = done;

        info!(
            "Attempt {} completed: {} fields, confidence {:.3}, source {}",
            attempt.id,
            attempt.fields.len(),
            attempt.confidence,
            attempt.source
        );
        self.events.publish(ExtractionEvent::Completed {
            document_id: attempt.document_id.clone(),
            attempt_id: attempt.id.clone(),
            confidence: attempt.confidence,
            source: attempt.source,
            needs_review: attempt.needs_review,
        });
        Ok(())
    }

    /// Escalate to AI when the rules found too little.
    fn should_escalate(
        &self,
        attempt: &ExtractionAttempt,
        has_text: bool,
        rules: &[FieldCandidate],
    ) -> Result<bool, StageFailure> {
        if self.policy.ai_mode != AiMode::Escalate || !has_text || attempt.low_content {
            return Ok(false);
        }
        let aggregate = merge(rules, &[])
            .map_err(|e| StageFailure::from_merge(&e))?
            .aggregate_confidence;
        let escalate = aggregate < self.policy.escalation_threshold;
        if escalate {
            info!(
                "Rule confidence {:.3} below {:.3}; escalating attempt {} to AI",
                aggregate, self.policy.escalation_threshold, attempt.id
            );
        }
        Ok(escalate)
    }

    /// Call the text adapter, retrying transient failures.
    async fn extract_text(&self, document: &Document) -> Result<RawText, StageFailure> {
        let cap = self.policy.text_attempt_cap.max(1);
        let timeout = self.policy.stage_timeout;
        let mut attempt = 0u32;
        loop {
            let call = self
                .text
                .extract_text(&document.storage_ref, document.format.mime_type());
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(TextError::TransientProviderError(format!(
                    "no text within {}s",
                    timeout.as_secs_f32()
                ))),
            };

            match result {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_transient() && attempt + 1 < cap => {
                    let wait = backoff_delay(attempt, self.policy.backoff_base_ms);
                    warn!(
                        "Text extraction for {} failed (attempt {}/{}): {}; retrying in {:?}",
                        document.id,
                        attempt + 1,
                        cap,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(StageFailure::from_text(&e)),
            }
        }
    }

    async fn advance(
        &self,
        attempt: &mut ExtractionAttempt,
        stage: ExtractionStage,
    ) -> Result<(), StageFailure> {
        attempt.enter_stage(stage);
        self.persist(attempt, stage).await?;
        info!("Attempt {} entering {}", attempt.id, stage);
        self.progress(attempt, stage);
        Ok(())
    }

    async fn persist(
        &self,
        attempt: &mut ExtractionAttempt,
        stage: ExtractionStage,
    ) -> Result<(), StageFailure> {
        self.store
            .update_attempt(attempt)
            .await
            .map_err(|e| StageFailure::from_store(&e, stage))
    }

    fn progress(&self, attempt: &ExtractionAttempt, stage: ExtractionStage) {
        self.events.publish(ExtractionEvent::Progress {
            document_id: attempt.document_id.clone(),
            attempt_id: attempt.id.clone(),
            stage,
            progress_percent: stage.progress_percent(),
        });
    }

    async fn record_failure(&self, attempt: &mut ExtractionAttempt, failure: StageFailure) {
        warn!(
            "Attempt {} failed at {} ({}): {}",
            attempt.id,
            failure.stage,
            failure.kind.as_str(),
            failure.message
        );
        if let Err(e) = attempt.fail(failure.kind, failure.message.clone(), failure.stage) {
            error!("Cannot mark attempt {} failed: {}", attempt.id, e);
            return;
        }
        if let Err(e) = self.store.update_attempt(attempt).await {
            error!("Could not persist failure of attempt {}: {}", attempt.id, e);
        }
        self.events.publish(ExtractionEvent::Failed {
            document_id: attempt.document_id.clone(),
            attempt_id: attempt.id.clone(),
            error_kind: failure.kind,
            message: failure.message,
            stage: failure.stage,
        });
    }
}
