//! Field extraction: raw text, deterministic rules and the AI model.

pub mod ai;
pub mod rules;
pub mod text;

pub use ai::{AiError, AiExtractor, FieldModel, LlmFieldModel, ModelOutput};
pub use rules::{extract_rules, RuleExtractor};
pub use text::{FileTextExtractor, RawText, TableHint, TextError, TextExtractor};
