//! In-process event bus for attempt lifecycle and progress.
//!
//! Events are advisory; the persisted attempt is always authoritative.
//! Subscribers that fall behind lose the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{ExtractionSource, ExtractionStage, FailureKind};

const DEFAULT_CAPACITY: usize = 256;

/// Lifecycle and progress notification for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionEvent {
    AttemptCreated {
        document_id: String,
        attempt_id: String,
        retry_count: i32,
    },
    Progress {
        document_id: String,
        attempt_id: String,
        stage: ExtractionStage,
        progress_percent: u8,
    },
    Completed {
        document_id: String,
        attempt_id: String,
        confidence: f64,
        source: ExtractionSource,
        needs_review: bool,
    },
    Failed {
        document_id: String,
        attempt_id: String,
        error_kind: FailureKind,
        message: String,
        stage: ExtractionStage,
    },
    Reviewed {
        document_id: String,
        attempt_id: String,
        review_id: String,
    },
}

impl ExtractionEvent {
    pub fn document_id(&self) -> &str {
        match self {
            Self::AttemptCreated { document_id, .. }
            | Self::Progress { document_id, .. }
            | Self::Completed { document_id, .. }
            | Self::Failed { document_id, .. }
            | Self::Reviewed { document_id, .. } => document_id,
        }
    }

    pub fn attempt_id(&self) -> &str {
        match self {
            Self::AttemptCreated { attempt_id, .. }
            | Self::Progress { attempt_id, .. }
            | Self::Completed { attempt_id, .. }
            | Self::Failed { attempt_id, .. }
            | Self::Reviewed { attempt_id, .. } => attempt_id,
        }
    }

    /// Progress implied by the event; terminal events report 100.
    pub fn progress_percent(&self) -> Option<u8> {
        match self {
            Self::AttemptCreated { .. } => Some(0),
            Self::Progress {
                progress_percent, ..
            } => Some(*progress_percent),
            Self::Completed { .. } | Self::Failed { .. } => Some(100),
            Self::Reviewed { .. } => None,
        }
    }

    /// The pipeline is done with the attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Broadcast bus shared by the pipeline and the review layer.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExtractionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ExtractionEvent) {
        trace!(?event, "publish");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtractionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
