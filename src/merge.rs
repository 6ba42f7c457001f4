//! Confidence-based merge of rule-based and AI candidate sets.
//!
//! For every field proposed by either extractor the candidate with the
//! strictly higher confidence wins. An exact tie goes to the AI candidate.
//! The aggregate confidence is the mean over the selected fields.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use crate::models::{
    mean_confidence, ExtractedField, ExtractionSource, FieldCandidate, FieldMap, FieldName,
    FieldSource,
};

#[derive(Debug, Error, PartialEq)]
pub enum MergeError {
    #[error("Invalid confidence {confidence} for field {field} ({origin})")]
    InvalidConfidence {
        field: String,
        confidence: f64,
        origin: FieldSource,
    },
    #[error("Unknown field: {0}")]
    UnknownField(String),
}

/// Output of [`merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub fields: FieldMap,
    /// Mean of the selected fields' confidences; 0 when empty.
    pub aggregate_confidence: f64,
    /// Winning source per field.
    pub field_sources: BTreeMap<FieldName, FieldSource>,
    /// Attempt-level label.
    pub source: ExtractionSource,
}

impl MergeResult {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Merge two candidate sets.
///
/// Fails fast on a confidence outside [0, 1] (NaN included) or a custom field
/// with an empty name; both indicate a misbehaving extractor.
pub fn merge(
    rule_candidates: &[FieldCandidate],
    ai_candidates: &[FieldCandidate],
) -> Result<MergeResult, MergeError> {
    let rules = best_per_field(rule_candidates)?;
    let ai = best_per_field(ai_candidates)?;

    let mut fields = FieldMap::new();
    let mut field_sources = BTreeMap::new();
    let mut rule_won = 0usize;
    let mut ai_won = 0usize;

    let names: BTreeSet<&FieldName> = rules.keys().chain(ai.keys()).copied().collect();

    for name in names {
        let (winner, from_ai) = match (rules.get(name), ai.get(name)) {
            (Some(r), Some(a)) => {
                if r.confidence > a.confidence {
                    (*r, false)
                } else {
                    (*a, true)
                }
            }
            (Some(r), None) => (*r, false),
            (None, Some(a)) => (*a, true),
            (None, None) => continue,
        };

        if from_ai {
            ai_won += 1;
        } else {
            rule_won += 1;
        }

        debug!(
            field = %name,
            source = %winner.source,
            confidence = winner.confidence,
            "merge selected candidate"
        );
        field_sources.insert(name.clone(), winner.source);
        fields.insert(name.clone(), ExtractedField::from(winner.clone()));
    }

    let source = match (rule_won > 0, ai_won > 0) {
        (true, true) => ExtractionSource::Merged,
        (false, true) => ExtractionSource::AiBased,
        _ => ExtractionSource::RuleBased,
    };

    Ok(MergeResult {
        aggregate_confidence: mean_confidence(&fields),
        fields,
        field_sources,
        source,
    })
}

/// Validate a set and keep the best candidate per field.
///
/// Within one set the higher confidence wins and the earlier candidate keeps
/// a tie, so input order is the only tie-break.
fn best_per_field(
    candidates: &[FieldCandidate],
) -> Result<BTreeMap<&FieldName, &FieldCandidate>, MergeError> {
    let mut best: BTreeMap<&FieldName, &FieldCandidate> = BTreeMap::new();
    for candidate in candidates {
        validate(candidate)?;
        match best.get(&candidate.name) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            _ => {
                best.insert(&candidate.name, candidate);
            }
        }
    }
    Ok(best)
}

fn validate(candidate: &FieldCandidate) -> Result<(), MergeError> {
    if !(0.0..=1.0).contains(&candidate.confidence) {
        return Err(MergeError::InvalidConfidence {
            field: candidate.name.to_string(),
            confidence: candidate.confidence,
            origin: candidate.source,
        });
    }
    if let FieldName::Custom(name) = &candidate.name {
        if name.is_empty() {
            return Err(MergeError::UnknownField(candidate.name.to_string()));
        }
    }
    Ok(())
}
