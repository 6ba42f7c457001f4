//! End-to-end pipeline behavior over the in-memory store.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use farmdoc::config::AiMode;
use farmdoc::extract::{ModelOutput, TextError, TextExtractor};
use farmdoc::models::{
    AttemptStatus, CanonicalField, ExtractionSource, ExtractionStage, FailureKind,
    FieldCandidate, FieldName, FieldSource, FieldValue,
};
use farmdoc::pipeline::{
    ExtractionEvent, ExtractionService, RetryError, RetryRequest, RetryTarget, TriggerError,
};
use farmdoc::repository::MemoryAttemptStore;
use farmdoc::review::ReviewService;

/// Long enough to not count as low content; only a date for the rules.
const SPARSE_TEXT: &str =
    "Inspection notes for the northern pasture, dated 2024-03-01 by the field office.";

/// Long enough to not count as low content; two labeled fields.
const LABELED_TEXT: &str =
    "Farm Name: Green Acres\nOwner: J. Smith\nThe sheep graze on the northern slopes.";

fn service(
    text: Arc<dyn TextExtractor>,
    model: Arc<ScriptedModel>,
    ai_mode: AiMode,
) -> ExtractionService {
    ExtractionService::new(Arc::new(MemoryAttemptStore::new()), text, policy(ai_mode))
        .with_ai_model(model)
}

fn retry_document(document_id: &str, force_ai: bool) -> RetryRequest {
    RetryRequest {
        target: RetryTarget::Document(document_id.to_string()),
        force_ai,
    }
}

#[tokio::test]
async fn test_rules_and_ai_are_merged() {
    let model = ScriptedModel::always(Ok(happy_ai_output()));
    let service = service(FixedText::new(HAPPY_TEXT), model.clone(), AiMode::Always);

    let attempt = service.trigger_and_wait(input("doc-1")).await.unwrap();

    assert_eq!(attempt.status, AttemptStatus::Completed);
    assert_eq!(attempt.source, ExtractionSource::Merged);
    assert_eq!(attempt.fields.len(), 3);
    assert!((attempt.confidence - 0.7667).abs() < 1e-3);
    assert!(attempt.low_content);
    assert!(!attempt.needs_review);
    assert_eq!(model.calls(), 1);

    let farm = &attempt.fields[&FieldName::from(CanonicalField::FarmName)];
    assert_eq!(farm.source, FieldSource::AiBased);
    assert_eq!(farm.confidence, 0.95);
    let owner = &attempt.fields[&FieldName::from(CanonicalField::OwnerName)];
    assert_eq!(owner.source, FieldSource::RuleBased);
    assert_eq!(owner.value, FieldValue::Text("J. Smith".into()));
    let email = &attempt.fields[&FieldName::from(CanonicalField::ContactEmail)];
    assert_eq!(email.source, FieldSource::AiBased);

    let document = service.document("doc-1").await.unwrap().unwrap();
    assert_eq!(document.file_name, "doc-1.pdf");
    assert_eq!(document.farm_id.as_deref(), Some("farm-7"));
}

#[tokio::test]
async fn test_empty_document_completes_without_fields() {
    let model = ScriptedModel::always(Ok(happy_ai_output()));
    let service = service(FixedText::new(""), model.clone(), AiMode::Escalate);

    let attempt = service.trigger_and_wait(input("doc-1")).await.unwrap();

    assert_eq!(attempt.status, AttemptStatus::Completed);
    assert!(attempt.fields.is_empty());
    assert_eq!(attempt.confidence, 0.0);
    assert_eq!(attempt.source, ExtractionSource::RuleBased);
    assert!(attempt.low_content);
    assert!(!attempt.needs_review);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_rules_only_when_ai_disabled() {
    let model = ScriptedModel::always(Ok(happy_ai_output()));
    let service = service(FixedText::new(HAPPY_TEXT), model.clone(), AiMode::Never);

    let attempt = service.trigger_and_wait(input("doc-1")).await.unwrap();

    assert_eq!(attempt.source, ExtractionSource::RuleBased);
    assert_eq!(attempt.fields.len(), 2);
    assert!((attempt.confidence - 0.775).abs() < 1e-9);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_provider_timeouts_then_forced_retry() {
    let text = FixedText::new(HAPPY_TEXT);
    let model = ScriptedModel::new(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        Ok(happy_ai_output()),
    );
    let service = service(text.clone(), model.clone(), AiMode::Always);

    let failed = service.trigger_and_wait(input("doc-1")).await.unwrap();
    assert_eq!(failed.status, AttemptStatus::Failed);
    assert_eq!(failed.error_kind, Some(FailureKind::ProviderTimeout));
    assert_eq!(failed.failed_stage, Some(ExtractionStage::AiExtraction));
    assert!(failed.fields.is_empty());
    assert_eq!(model.calls(), 3);

    let retried = service
        .retry_and_wait(retry_document("doc-1", true))
        .await
        .unwrap();
    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.status, AttemptStatus::Completed);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.force_ai);
    assert_eq!(retried.source, ExtractionSource::Merged);
    // Text from the first attempt was reused.
    assert_eq!(text.calls(), 1);

    let attempts = service.attempts_for("doc-1").await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, AttemptStatus::Failed);
    let latest = service.latest_attempt("doc-1").await.unwrap().unwrap();
    assert_eq!(latest.id, retried.id);

    // The failed attempt is superseded; the completed one is not retryable.
    let err = service
        .retry(RetryRequest {
            target: RetryTarget::Attempt(failed.id.clone()),
            force_ai: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::Superseded { .. }));
    let err = service
        .retry(retry_document("doc-1", false))
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::NotRetryable { status: AttemptStatus::Completed, .. }));
}

#[tokio::test]
async fn test_retry_limit() {
    let model = ScriptedModel::always(Err(timeout()));
    let service = service(FixedText::new(HAPPY_TEXT), model, AiMode::Always);

    let first = service.trigger_and_wait(input("doc-1")).await.unwrap();
    assert_eq!(first.status, AttemptStatus::Failed);

    for expected in 1..=3 {
        let attempt = service
            .retry_and_wait(retry_document("doc-1", false))
            .await
            .unwrap();
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.retry_count, expected);
    }

    let err = service
        .retry(retry_document("doc-1", false))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetryError::RetryLimitExceeded { max_retries: 3, .. }
    ));
    assert_eq!(service.attempts_for("doc-1").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_trigger_cannot_reset_retry_cap() {
    let model = ScriptedModel::always(Err(timeout()));
    let service = service(FixedText::new(HAPPY_TEXT), model, AiMode::Always);

    service.trigger_and_wait(input("doc-1")).await.unwrap();
    for _ in 0..3 {
        service
            .retry_and_wait(retry_document("doc-1", false))
            .await
            .unwrap();
    }
    assert!(matches!(
        service.retry(retry_document("doc-1", false)).await,
        Err(RetryError::RetryLimitExceeded { .. })
    ));

    let err = service.trigger(input("doc-1")).await.unwrap_err();
    assert!(matches!(err, TriggerError::ValidationError(_)));
    assert!(matches!(
        service.retry(retry_document("doc-1", false)).await,
        Err(RetryError::RetryLimitExceeded { .. })
    ));

    let attempts = service.attempts_for("doc-1").await.unwrap();
    assert_eq!(attempts.len(), 4);
    assert!(attempts.iter().all(|a| a.status == AttemptStatus::Failed));
}

#[tokio::test]
async fn test_escalates_when_rules_are_weak() {
    let model = ScriptedModel::always(Ok(happy_ai_output()));
    let service = service(FixedText::new(SPARSE_TEXT), model.clone(), AiMode::Escalate);

    let attempt = service.trigger_and_wait(input("doc-1")).await.unwrap();

    assert_eq!(attempt.status, AttemptStatus::Completed);
    assert!(!attempt.low_content);
    assert_eq!(model.calls(), 1);
    assert_eq!(attempt.source, ExtractionSource::Merged);
    assert_eq!(attempt.fields.len(), 3);
    assert_eq!(
        attempt.fields[&FieldName::from(CanonicalField::DocumentDate)].source,
        FieldSource::RuleBased
    );
}

#[tokio::test]
async fn test_no_escalation_when_rules_are_confident() {
    let model = ScriptedModel::always(Ok(happy_ai_output()));
    let service = service(FixedText::new(LABELED_TEXT), model.clone(), AiMode::Escalate);

    let attempt = service.trigger_and_wait(input("doc-1")).await.unwrap();

    assert_eq!(attempt.status, AttemptStatus::Completed);
    assert!(!attempt.low_content);
    assert_eq!(model.calls(), 0);
    assert_eq!(attempt.source, ExtractionSource::RuleBased);
    assert!((attempt.confidence - 0.775).abs() < 1e-9);
}

#[tokio::test]
async fn test_transient_text_failures_then_retry_rereads_file() {
    let text = FlakyText::new(vec![ocr_down(), ocr_down(), ocr_down()], Some(HAPPY_TEXT));
    let service = service(
        text.clone(),
        ScriptedModel::always(Ok(happy_ai_output())),
        AiMode::Never,
    );

    let failed = service.trigger_and_wait(input("doc-1")).await.unwrap();
    assert_eq!(failed.status, AttemptStatus::Failed);
    assert_eq!(failed.error_kind, Some(FailureKind::TransientProvider));
    assert_eq!(failed.failed_stage, Some(ExtractionStage::TextExtraction));
    assert_eq!(text.calls(), 3);

    let retried = service
        .retry_and_wait(retry_document("doc-1", false))
        .await
        .unwrap();
    assert_eq!(retried.status, AttemptStatus::Completed);
    assert_eq!(retried.fields.len(), 2);
    assert_eq!(text.calls(), 4);
}

#[tokio::test]
async fn test_unsupported_format_is_not_retried() {
    let text = FlakyText::new(
        vec![TextError::UnsupportedFormat("encrypted pdf".into())],
        Some(HAPPY_TEXT),
    );
    let service = service(
        text.clone(),
        ScriptedModel::always(Ok(happy_ai_output())),
        AiMode::Never,
    );

    let failed = service.trigger_and_wait(input("doc-1")).await.unwrap();
    assert_eq!(failed.status, AttemptStatus::Failed);
    assert_eq!(failed.error_kind, Some(FailureKind::UnsupportedFormat));
    assert_eq!(failed.failed_stage, Some(ExtractionStage::TextExtraction));
    assert_eq!(text.calls(), 1);
}

#[tokio::test]
async fn test_out_of_range_model_confidence_fails_attempt() {
    let region = FieldCandidate::text(CanonicalField::Region, "North", 1.2, FieldSource::AiBased);
    let output = ModelOutput {
        candidates: vec![region],
        truncated: true,
    };
    let service = service(
        FixedText::new(HAPPY_TEXT),
        ScriptedModel::always(Ok(output)),
        AiMode::Always,
    );

    let failed = service.trigger_and_wait(input("doc-1")).await.unwrap();
    assert_eq!(failed.status, AttemptStatus::Failed);
    assert_eq!(failed.error_kind, Some(FailureKind::InvalidConfidence));
    assert_eq!(failed.failed_stage, Some(ExtractionStage::Merge));
    assert!(failed.fields.is_empty());
}

#[tokio::test]
async fn test_forced_ai_without_model_fails() {
    let service = ExtractionService::new(
        Arc::new(MemoryAttemptStore::new()),
        FixedText::new(HAPPY_TEXT),
        policy(AiMode::Never),
    );
    let mut forced = input("doc-1");
    forced.force_ai = true;

    let failed = service.trigger_and_wait(forced).await.unwrap();
    assert_eq!(failed.status, AttemptStatus::Failed);
    assert_eq!(failed.error_kind, Some(FailureKind::ProviderError));
    assert_eq!(failed.failed_stage, Some(ExtractionStage::AiExtraction));
}

#[tokio::test]
async fn test_retry_unknown_document() {
    let service = service(
        FixedText::new(HAPPY_TEXT),
        ScriptedModel::always(Ok(happy_ai_output())),
        AiMode::Never,
    );
    let err = service
        .retry(retry_document("missing", false))
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::DocumentNotFound(_)));
}

#[tokio::test]
async fn test_correction_audit() {
    let service = service(
        FixedText::new(HAPPY_TEXT),
        ScriptedModel::always(Ok(happy_ai_output())),
        AiMode::Always,
    );
    let attempt = service.trigger_and_wait(input("doc-1")).await.unwrap();

    let reviews = ReviewService::new(service.store(), service.events());
    let mut events = service.subscribe();

    let farm_name = FieldName::from(CanonicalField::FarmName);
    let mut corrections = BTreeMap::new();
    corrections.insert(farm_name.clone(), FieldValue::Text("Green Acres Farm".into()));
    let record = reviews
        .submit_correction(&attempt.id, corrections, "reviewer-9", Some("typo".into()))
        .await
        .unwrap();

    assert_eq!(
        record.original_data[&farm_name].value,
        FieldValue::Text("Green Acres".into())
    );
    assert_eq!(
        record.corrected_data[&farm_name].value,
        FieldValue::Text("Green Acres Farm".into())
    );
    assert_eq!(record.reviewer_id, "reviewer-9");

    let reviewed = service.attempt(&attempt.id).await.unwrap().unwrap();
    assert_eq!(reviewed.status, AttemptStatus::Reviewed);
    assert_eq!(reviewed.fields[&farm_name].source, FieldSource::Manual);
    assert_eq!(
        reviewed.fields[&FieldName::from(CanonicalField::OwnerName)].source,
        FieldSource::RuleBased
    );
    assert_eq!(reviewed.source, ExtractionSource::Merged);

    match events.recv().await.unwrap() {
        ExtractionEvent::Reviewed { review_id, .. } => assert_eq!(review_id, record.id),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(reviews.history(&attempt.id).await.unwrap().len(), 1);

    let err = service
        .retry(retry_document("doc-1", false))
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::NotRetryable { status: AttemptStatus::Reviewed, .. }));
}

#[tokio::test]
async fn test_event_order() {
    let service = service(
        FixedText::new(HAPPY_TEXT),
        ScriptedModel::always(Ok(happy_ai_output())),
        AiMode::Always,
    );
    let mut events = service.subscribe();
    let attempt = service.trigger_and_wait(input("doc-1")).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.attempt_id(), attempt.id);
        seen.push(event.progress_percent());
        if event.is_terminal() {
            assert!(matches!(event, ExtractionEvent::Completed { .. }));
        }
    }
    assert_eq!(
        seen,
        vec![Some(0), Some(10), Some(35), Some(60), Some(90), Some(100)]
    );
}

#[tokio::test]
async fn test_trigger_validation() {
    let service = service(
        FixedText::new(HAPPY_TEXT),
        ScriptedModel::always(Ok(happy_ai_output())),
        AiMode::Never,
    );

    let mut bad = input("doc-1");
    bad.mime_type = "text/html".into();
    assert!(matches!(
        service.trigger(bad).await,
        Err(TriggerError::ValidationError(_))
    ));
    assert!(service.document("doc-1").await.unwrap().is_none());

    service.trigger_and_wait(input("doc-1")).await.unwrap();
    let mut moved = input("doc-1");
    moved.storage_ref = "file:///elsewhere/doc-1.pdf".into();
    assert!(matches!(
        service.trigger(moved).await,
        Err(TriggerError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_in_flight_limit() {
    let mut limited = policy(AiMode::Never);
    limited.max_in_flight = 1;
    let service = ExtractionService::new(
        Arc::new(MemoryAttemptStore::new()),
        FixedText::slow(HAPPY_TEXT, Duration::from_millis(200)),
        limited,
    );

    let first = service.trigger(input("doc-a")).await.unwrap();
    let err = service.trigger(input("doc-b")).await.unwrap_err();
    assert!(matches!(err, TriggerError::RateLimited { limit: 1 }));
    assert!(service.document("doc-b").await.unwrap().is_none());

    let mut accepted = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if service.trigger(input("doc-b")).await.is_ok() {
            accepted = true;
            break;
        }
    }
    assert!(accepted);
    let done = service.attempt(&first).await.unwrap().unwrap();
    assert_eq!(done.status, AttemptStatus::Completed);
}
