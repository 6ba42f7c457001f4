//! farmdoc - field extraction for farm subsidy documents.
//!
//! Uploaded applications, leases, permits and invoices go through a staged
//! pipeline (text, rules, optional AI, merge) that produces a typed field
//! map with per-field confidence and provenance. Failed attempts can be
//! retried, finished ones corrected by a reviewer with a full audit trail.

// from_str helpers return Option rather than Result, so FromStr does not fit.
#![allow(clippy::should_implement_trait)]

pub mod cli;
pub mod config;
pub mod extract;
pub mod llm;
pub mod merge;
mod migrations;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod repository;
pub mod review;
pub mod schema;
pub mod storage;

pub use pipeline::{
    EventBus, ExtractionEvent, ExtractionInput, ExtractionService, RetryError, RetryRequest,
    RetryTarget, TriggerError,
};
pub use review::{ReviewError, ReviewService};
