//! Extraction pipeline: the attempt state machine, the event bus and the
//! service that triggers and retries runs.
//!
//! ```text
//! trigger ─► pending ─► processing ─┬─► completed ─► reviewed
//!                      (text, rules, │
//!                       ai, merge)   └─► failed ──► retry = new attempt
//! ```

mod error;
mod events;
mod runner;
mod service;

pub use error::{RetryError, TriggerError};
pub use events::{EventBus, ExtractionEvent};
pub use service::{ExtractionInput, ExtractionService, RetryRequest, RetryTarget};
