//! Review audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::field::FieldMap;

/// Audit entry for one human correction. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: String,
    pub attempt_id: String,
    pub reviewer_id: String,
    /// Field map before the correction.
    pub original_data: FieldMap,
    /// Field map after the correction.
    pub corrected_data: FieldMap,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReviewRecord {
    pub fn new(
        attempt_id: &str,
        reviewer_id: &str,
        original_data: FieldMap,
        corrected_data: FieldMap,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attempt_id: attempt_id.to_string(),
            reviewer_id: reviewer_id.to_string(),
            original_data,
            corrected_data,
            notes,
            created_at: Utc::now(),
        }
    }
}
