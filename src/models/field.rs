//! Field vocabulary, typed field values and extractor candidates.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Prefix that marks a field outside the canonical vocabulary.
pub const CUSTOM_PREFIX: &str = "custom_";

/// Kind of scalar a canonical field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Number,
    Date,
}

/// Canonical field names understood by every extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalField {
    FarmName,
    OwnerName,
    ContactEmail,
    ContactPhone,
    Address,
    PostalCode,
    Municipality,
    Region,
    Country,
    FarmSizeHectares,
    RegistrationNumber,
    TaxId,
    Iban,
    CropTypes,
    LivestockCount,
    SubsidyProgram,
    ApplicationDate,
    Deadline,
    AmountRequested,
    Currency,
    DocumentDate,
    CertificationNumber,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 22] = [
        Self::FarmName,
        Self::OwnerName,
        Self::ContactEmail,
        Self::ContactPhone,
        Self::Address,
        Self::PostalCode,
        Self::Municipality,
        Self::Region,
        Self::Country,
        Self::FarmSizeHectares,
        Self::RegistrationNumber,
        Self::TaxId,
        Self::Iban,
        Self::CropTypes,
        Self::LivestockCount,
        Self::SubsidyProgram,
        Self::ApplicationDate,
        Self::Deadline,
        Self::AmountRequested,
        Self::Currency,
        Self::DocumentDate,
        Self::CertificationNumber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FarmName => "farm_name",
            Self::OwnerName => "owner_name",
            Self::ContactEmail => "contact_email",
            Self::ContactPhone => "contact_phone",
            Self::Address => "address",
            Self::PostalCode => "postal_code",
            Self::Municipality => "municipality",
            Self::Region => "region",
            Self::Country => "country",
            Self::FarmSizeHectares => "farm_size_hectares",
            Self::RegistrationNumber => "registration_number",
            Self::TaxId => "tax_id",
            Self::Iban => "iban",
            Self::CropTypes => "crop_types",
            Self::LivestockCount => "livestock_count",
            Self::SubsidyProgram => "subsidy_program",
            Self::ApplicationDate => "application_date",
            Self::Deadline => "deadline",
            Self::AmountRequested => "amount_requested",
            Self::Currency => "currency",
            Self::DocumentDate => "document_date",
            Self::CertificationNumber => "certification_number",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == s)
    }

    /// Resolve a common synonym to its canonical field.
    pub fn from_alias(s: &str) -> Option<Self> {
        match s {
            "farm" | "holding_name" | "farm_title" => Some(Self::FarmName),
            "owner" | "farmer" | "applicant" | "applicant_name" | "holder" => {
                Some(Self::OwnerName)
            }
            "email" | "e_mail" | "email_address" => Some(Self::ContactEmail),
            "phone" | "telephone" | "phone_number" | "tel" => Some(Self::ContactPhone),
            "street_address" | "farm_address" => Some(Self::Address),
            "zip" | "zip_code" | "postcode" => Some(Self::PostalCode),
            "city" | "town" | "commune" => Some(Self::Municipality),
            "province" | "county" | "state" => Some(Self::Region),
            "farm_size" | "area_hectares" | "total_area" | "hectares" => {
                Some(Self::FarmSizeHectares)
            }
            "registration_no" | "farm_id" | "holding_number" => Some(Self::RegistrationNumber),
            "vat_number" | "tax_number" | "vat_id" => Some(Self::TaxId),
            "bank_account" => Some(Self::Iban),
            "crops" | "crop_type" => Some(Self::CropTypes),
            "livestock" | "animals" | "head_of_cattle" => Some(Self::LivestockCount),
            "program" | "programme" | "scheme" | "subsidy_scheme" => Some(Self::SubsidyProgram),
            "submission_date" | "date_of_application" => Some(Self::ApplicationDate),
            "due_date" | "closing_date" => Some(Self::Deadline),
            "amount" | "requested_amount" | "total_amount" => Some(Self::AmountRequested),
            "date" | "issue_date" => Some(Self::DocumentDate),
            "certificate_number" | "certificate_no" => Some(Self::CertificationNumber),
            _ => None,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::FarmSizeHectares | Self::AmountRequested => ValueKind::Number,
            Self::LivestockCount => ValueKind::Integer,
            Self::ApplicationDate | Self::Deadline | Self::DocumentDate => ValueKind::Date,
            _ => ValueKind::Text,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldNameError {
    #[error("Unknown field: {0} (use custom_<name> for fields outside the vocabulary)")]
    UnknownField(String),
}

/// A field name: either canonical or an explicitly tagged custom field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldName {
    Canonical(CanonicalField),
    /// Stores the part after `custom_`.
    Custom(String),
}

impl FieldName {
    /// Normalize and validate a raw field name.
    ///
    /// Accepts canonical names, known aliases and `custom_<name>`, in any
    /// case and with spaces or dashes in place of underscores.
    pub fn parse(raw: &str) -> Result<Self, FieldNameError> {
        let normalized = normalize_key(raw);

        if let Some(rest) = normalized.strip_prefix(CUSTOM_PREFIX) {
            if !rest.is_empty() {
                return Ok(Self::Custom(rest.to_string()));
            }
        }

        CanonicalField::from_str(&normalized)
            .or_else(|| CanonicalField::from_alias(&normalized))
            .map(Self::Canonical)
            .ok_or_else(|| FieldNameError::UnknownField(raw.to_string()))
    }

    pub fn custom(name: &str) -> Self {
        Self::Custom(normalize_key(name))
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// Value kind used to coerce raw strings for this field.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Canonical(field) => field.kind(),
            Self::Custom(_) => ValueKind::Text,
        }
    }
}

impl From<CanonicalField> for FieldName {
    fn from(field: CanonicalField) -> Self {
        Self::Canonical(field)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canonical(field) => f.write_str(field.as_str()),
            Self::Custom(name) => write!(f, "{}{}", CUSTOM_PREFIX, name),
        }
    }
}

impl Serialize for FieldName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FieldName::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Lowercase, map separators to `_`, collapse repeats.
fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = if c.is_whitespace() || c == '-' || c == '.' || c == '/' {
            '_'
        } else {
            c.to_ascii_lowercase()
        };
        if c == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        if c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// A typed scalar value for one field.
///
/// Serialized as a bare JSON scalar. Dates and text both serialize as
/// strings, so strings always deserialize as `Text`; [`restore_kinds`]
/// turns ISO dates back into `Date` for date-kind fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Scalar {
            Bool(bool),
            Integer(i64),
            Number(f64),
            Text(String),
        }

        Ok(match Scalar::deserialize(deserializer)? {
            Scalar::Bool(b) => Self::Bool(b),
            Scalar::Integer(i) => Self::Integer(i),
            Scalar::Number(n) => Self::Number(n),
            Scalar::Text(s) => Self::Text(s),
        })
    }
}

impl FieldValue {
    /// Interpret a raw string according to the expected kind, falling back to text.
    pub fn coerce(kind: ValueKind, raw: &str) -> Self {
        let trimmed = raw.trim();
        match kind {
            ValueKind::Integer => {
                let digits: String = trimmed
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '-')
                    .collect();
                digits
                    .parse()
                    .map(Self::Integer)
                    .unwrap_or_else(|_| Self::Text(trimmed.to_string()))
            }
            ValueKind::Number => parse_number(trimmed)
                .map(Self::Number)
                .unwrap_or_else(|| Self::Text(trimmed.to_string())),
            ValueKind::Date => parse_date(trimmed)
                .map(Self::Date)
                .unwrap_or_else(|| Self::Text(trimmed.to_string())),
            ValueKind::Text => Self::Text(trimmed.to_string()),
        }
    }

    /// Convert a JSON value returned by a model.
    pub fn from_json(kind: ValueKind, value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => match (kind, n.as_i64()) {
                (ValueKind::Integer, Some(i)) => Some(Self::Integer(i)),
                (ValueKind::Text, Some(i)) => Some(Self::Text(i.to_string())),
                _ => n.as_f64().map(Self::Number),
            },
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(Self::coerce(kind, s)),
            serde_json::Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                Some(Self::Text(parts.join(", ")))
            }
            other => Some(Self::Text(other.to_string())),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Number(n) => write!(f, "{}", n),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Parse "12,5", "1 200.50" or "1.200,50" style numbers.
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized.parse().ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 5] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Provenance of a single field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldSource {
    #[serde(rename = "rule-based")]
    RuleBased,
    #[serde(rename = "ai-based")]
    AiBased,
    #[serde(rename = "manual")]
    Manual,
}

impl FieldSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleBased => "rule-based",
            Self::AiBased => "ai-based",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rule-based" => Some(Self::RuleBased),
            "ai-based" => Some(Self::AiBased),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extractor's proposal for one field. Never persisted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCandidate {
    pub name: FieldName,
    pub value: FieldValue,
    pub confidence: f64,
    pub source: FieldSource,
}

impl FieldCandidate {
    pub fn new(
        name: impl Into<FieldName>,
        value: FieldValue,
        confidence: f64,
        source: FieldSource,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            confidence,
            source,
        }
    }

    pub fn text(
        name: impl Into<FieldName>,
        value: &str,
        confidence: f64,
        source: FieldSource,
    ) -> Self {
        Self::new(name, FieldValue::Text(value.to_string()), confidence, source)
    }
}

/// A field as stored on an attempt after merge or review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub value: FieldValue,
    pub confidence: f64,
    pub source: FieldSource,
}

impl From<FieldCandidate> for ExtractedField {
    fn from(candidate: FieldCandidate) -> Self {
        Self {
            value: candidate.value,
            confidence: candidate.confidence,
            source: candidate.source,
        }
    }
}

/// Ordered field map; ordering keeps serialized snapshots stable.
pub type FieldMap = BTreeMap<FieldName, ExtractedField>;

/// Re-type deserialized values: ISO dates held by date-kind fields become
/// `Date` again. Values of every other field are left as loaded.
pub fn restore_kinds(fields: &mut FieldMap) {
    for (name, field) in fields.iter_mut() {
        if name.kind() != ValueKind::Date {
            continue;
        }
        if let FieldValue::Text(raw) = &field.value {
            if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                field.value = FieldValue::Date(date);
            }
        }
    }
}

/// Arithmetic mean of the field confidences, 0 for an empty map.
pub fn mean_confidence(fields: &FieldMap) -> f64 {
    if fields.is_empty() {
        return 0.0;
    }
    let sum: f64 = fields.values().map(|f| f.confidence).sum();
    sum / fields.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_and_aliases() {
        assert_eq!(
            FieldName::parse("farm_name").unwrap(),
            FieldName::Canonical(CanonicalField::FarmName)
        );
        assert_eq!(
            FieldName::parse("Farm Name").unwrap(),
            FieldName::Canonical(CanonicalField::FarmName)
        );
        assert_eq!(
            FieldName::parse("E-Mail").unwrap(),
            FieldName::Canonical(CanonicalField::ContactEmail)
        );
        assert_eq!(
            FieldName::parse("owner").unwrap(),
            FieldName::Canonical(CanonicalField::OwnerName)
        );
    }

    #[test]
    fn test_parse_custom_and_unknown() {
        assert_eq!(
            FieldName::parse("custom_irrigation_type").unwrap(),
            FieldName::Custom("irrigation_type".to_string())
        );
        assert_eq!(
            FieldName::parse("custom_irrigation_type").unwrap().to_string(),
            "custom_irrigation_type"
        );
        assert!(matches!(
            FieldName::parse("irrigation_type"),
            Err(FieldNameError::UnknownField(_))
        ));
        assert!(FieldName::parse("custom_").is_err());
    }

    #[test]
    fn test_every_canonical_name_round_trips() {
        for field in CanonicalField::ALL {
            assert_eq!(CanonicalField::from_str(field.as_str()), Some(field));
        }
    }

    #[test]
    fn test_field_map_json_uses_string_keys() {
        let mut map = FieldMap::new();
        map.insert(
            CanonicalField::FarmName.into(),
            ExtractedField {
                value: FieldValue::Text("Green Acres".to_string()),
                confidence: 0.8,
                source: FieldSource::RuleBased,
            },
        );
        map.insert(
            FieldName::custom("soil type"),
            ExtractedField {
                value: FieldValue::Number(6.5),
                confidence: 0.6,
                source: FieldSource::AiBased,
            },
        );

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["farm_name"]["value"], "Green Acres");
        assert_eq!(json["farm_name"]["source"], "rule-based");
        assert_eq!(json["custom_soil_type"]["source"], "ai-based");

        let back: FieldMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_date_like_text_survives_reload() {
        let field = |value| ExtractedField {
            value,
            confidence: 0.7,
            source: FieldSource::AiBased,
        };
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let mut map = FieldMap::new();
        map.insert(
            CanonicalField::RegistrationNumber.into(),
            field(FieldValue::Text("2024-03-15".into())),
        );
        map.insert(
            FieldName::custom("harvest"),
            field(FieldValue::Text("2024-03-15".into())),
        );
        map.insert(
            CanonicalField::ApplicationDate.into(),
            field(FieldValue::Date(date)),
        );
        map.insert(
            CanonicalField::Deadline.into(),
            field(FieldValue::Text("end of March".into())),
        );

        let json = serde_json::to_string(&map).unwrap();
        let mut back: FieldMap = serde_json::from_str(&json).unwrap();
        restore_kinds(&mut back);
        assert_eq!(back, map);
    }

    #[test]
    fn test_coerce_values() {
        assert_eq!(
            FieldValue::coerce(ValueKind::Number, "12,5 ha"),
            FieldValue::Number(12.5)
        );
        assert_eq!(
            FieldValue::coerce(ValueKind::Number, "EUR 1.200,50"),
            FieldValue::Number(1200.5)
        );
        assert_eq!(
            FieldValue::coerce(ValueKind::Integer, "120 head"),
            FieldValue::Integer(120)
        );
        assert_eq!(
            FieldValue::coerce(ValueKind::Date, "15.03.2024"),
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert_eq!(
            FieldValue::coerce(ValueKind::Date, "next spring"),
            FieldValue::Text("next spring".to_string())
        );
        assert_eq!(
            FieldValue::coerce(ValueKind::Text, " 01234 "),
            FieldValue::Text("01234".to_string())
        );
    }

    #[test]
    fn test_mean_confidence() {
        let mut map = FieldMap::new();
        assert_eq!(mean_confidence(&map), 0.0);
        for (name, confidence) in [(CanonicalField::FarmName, 0.9), (CanonicalField::Region, 0.5)] {
            map.insert(
                name.into(),
                ExtractedField {
                    value: FieldValue::Text("x".to_string()),
                    confidence,
                    source: FieldSource::RuleBased,
                },
            );
        }
        assert_eq!(mean_confidence(&map), 0.7);
    }
}
