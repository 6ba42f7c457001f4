//! Pipeline and review over a real SQLite database.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use farmdoc::config::AiMode;
use farmdoc::models::{AttemptStatus, CanonicalField, FieldName, FieldSource, FieldValue};
use farmdoc::pipeline::{ExtractionService, RetryRequest, RetryTarget};
use farmdoc::repository::{run_migrations, AttemptStore, DieselAttemptStore};
use farmdoc::review::ReviewService;

async fn open(url: &str) -> Arc<DieselAttemptStore> {
    run_migrations(url).await.unwrap();
    Arc::new(DieselAttemptStore::from_url(url).unwrap())
}

#[tokio::test]
async fn test_extraction_and_review_persist() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("farmdoc.db").display());

    let store = open(&url).await;
    let service = ExtractionService::new(
        store.clone(),
        FixedText::new(HAPPY_TEXT),
        policy(AiMode::Always),
    )
    .with_ai_model(ScriptedModel::always(Ok(happy_ai_output())));

    let attempt = service.trigger_and_wait(input("doc-1")).await.unwrap();
    assert_eq!(attempt.status, AttemptStatus::Completed);

    let reviews = ReviewService::new(store.clone(), service.events());
    let mut corrections = BTreeMap::new();
    corrections.insert(
        FieldName::from(CanonicalField::LivestockCount),
        FieldValue::Integer(42),
    );
    reviews
        .submit_correction(&attempt.id, corrections, "reviewer-1", None)
        .await
        .unwrap();

    // A fresh connection sees everything.
    let reopened = open(&url).await;
    let stored = reopened.latest_attempt("doc-1").await.unwrap().unwrap();
    assert_eq!(stored.id, attempt.id);
    assert_eq!(stored.status, AttemptStatus::Reviewed);
    assert_eq!(stored.fields.len(), 4);
    let livestock = &stored.fields[&FieldName::from(CanonicalField::LivestockCount)];
    assert_eq!(livestock.value, FieldValue::Integer(42));
    assert_eq!(livestock.source, FieldSource::Manual);
    assert_eq!(
        stored.fields[&FieldName::from(CanonicalField::FarmName)].source,
        FieldSource::AiBased
    );

    let history = reopened.reviews_for(&attempt.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].original_data.len(), 3);
    assert_eq!(history[0].corrected_data.len(), 4);

    let text = reopened.cached_text("doc-1").await.unwrap().unwrap();
    assert_eq!(text.text, HAPPY_TEXT);
}

#[tokio::test]
async fn test_failed_attempt_retried_from_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("farmdoc.db").display());
    let store = open(&url).await;

    let text = FixedText::new(HAPPY_TEXT);
    let model = ScriptedModel::new(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        Ok(happy_ai_output()),
    );
    let service = ExtractionService::new(store, text.clone(), policy(AiMode::Always))
        .with_ai_model(model);

    let failed = service.trigger_and_wait(input("doc-1")).await.unwrap();
    assert_eq!(failed.status, AttemptStatus::Failed);

    let retried = service
        .retry_and_wait(RetryRequest {
            target: RetryTarget::Attempt(failed.id.clone()),
            force_ai: true,
        })
        .await
        .unwrap();
    assert_eq!(retried.status, AttemptStatus::Completed);
    assert_eq!(text.calls(), 1);

    let attempts = service.attempts_for("doc-1").await.unwrap();
    assert_eq!(
        attempts.iter().map(|a| a.retry_count).collect::<Vec<_>>(),
        vec![0, 1]
    );
}
