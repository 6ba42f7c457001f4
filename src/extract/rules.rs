//! Rule-Based Field Extractor.
//!
//! Deterministic regex rules over raw text. Confidence is fixed per rule
//! type: a value preceded by its canonical label scores higher than one
//! behind an alias label, which scores higher than a category-specific
//! label, which scores higher than a free-floating pattern match.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::models::{
    CanonicalField, DocumentCategory, FieldCandidate, FieldName, FieldSource, FieldValue,
    ValueKind,
};

pub const LABELED_CONFIDENCE: f64 = 0.8;
pub const ALIAS_CONFIDENCE: f64 = 0.75;
pub const CATEGORY_CONFIDENCE: f64 = 0.7;
pub const EMAIL_CONFIDENCE: f64 = 0.6;
pub const IBAN_CONFIDENCE: f64 = 0.6;
pub const PHONE_CONFIDENCE: f64 = 0.5;
pub const DATE_CONFIDENCE: f64 = 0.4;

/// Longest value a labeled rule will accept.
const MAX_VALUE_CHARS: usize = 200;

struct Rule {
    field: CanonicalField,
    confidence: f64,
    /// Only applies to documents of this category.
    category: Option<DocumentCategory>,
    regex: Regex,
}

/// (field, canonical labels, alias labels)
const LABELS: &[(CanonicalField, &[&str], &[&str])] = &[
    (
        CanonicalField::FarmName,
        &["farm name", "name of farm", "holding name"],
        &["farm", "holding"],
    ),
    (
        CanonicalField::OwnerName,
        &["owner name", "applicant name", "name of applicant"],
        &["owner", "farmer", "applicant", "holder"],
    ),
    (
        CanonicalField::ContactEmail,
        &["email address", "e-mail address", "contact email"],
        &["email", "e-mail"],
    ),
    (
        CanonicalField::ContactPhone,
        &["phone number", "telephone number", "contact phone"],
        &["phone", "telephone", "tel", "mobile"],
    ),
    (
        CanonicalField::Address,
        &["address", "farm address", "postal address"],
        &["street"],
    ),
    (
        CanonicalField::PostalCode,
        &["postal code", "postcode", "zip code"],
        &["zip"],
    ),
    (CanonicalField::Municipality, &["municipality"], &["city", "town"]),
    (CanonicalField::Region, &["region"], &["province", "county", "state"]),
    (CanonicalField::Country, &["country"], &[]),
    (
        CanonicalField::FarmSizeHectares,
        &["farm size", "total area", "area in hectares"],
        &["hectares", "area"],
    ),
    (
        CanonicalField::RegistrationNumber,
        &["registration number", "farm registration number", "holding number"],
        &["registration no", "reg no", "farm id"],
    ),
    (
        CanonicalField::TaxId,
        &["tax id", "vat number", "tax number"],
        &["vat", "tin"],
    ),
    (CanonicalField::Iban, &["iban"], &["bank account"]),
    (CanonicalField::CropTypes, &["crop types", "crops"], &["crop"]),
    (
        CanonicalField::LivestockCount,
        &["livestock count", "number of animals"],
        &["livestock", "head of cattle"],
    ),
    (CanonicalField::Currency, &["currency"], &[]),
    (
        CanonicalField::CertificationNumber,
        &["certification number"],
        &[],
    ),
];

/// (category, field, labels)
const CATEGORY_LABELS: &[(DocumentCategory, CanonicalField, &[&str])] = &[
    (
        DocumentCategory::SubsidyApplication,
        CanonicalField::SubsidyProgram,
        &["subsidy program", "program", "programme", "scheme", "measure"],
    ),
    (
        DocumentCategory::SubsidyApplication,
        CanonicalField::ApplicationDate,
        &["application date", "date of application", "submitted on"],
    ),
    (
        DocumentCategory::SubsidyApplication,
        CanonicalField::AmountRequested,
        &["amount requested", "requested amount", "amount"],
    ),
    (
        DocumentCategory::SubsidyApplication,
        CanonicalField::Deadline,
        &["deadline", "closing date"],
    ),
    (
        DocumentCategory::FarmRegistration,
        CanonicalField::DocumentDate,
        &["registration date", "date of registration"],
    ),
    (
        DocumentCategory::LandLease,
        CanonicalField::DocumentDate,
        &["lease start", "commencement date"],
    ),
    (
        DocumentCategory::LandLease,
        CanonicalField::Deadline,
        &["lease end", "expiry date"],
    ),
    (
        DocumentCategory::LandLease,
        CanonicalField::FarmSizeHectares,
        &["leased area"],
    ),
    (
        DocumentCategory::Invoice,
        CanonicalField::AmountRequested,
        &["total amount", "amount due", "total"],
    ),
    (
        DocumentCategory::Invoice,
        CanonicalField::DocumentDate,
        &["invoice date"],
    ),
    (
        DocumentCategory::Invoice,
        CanonicalField::Deadline,
        &["due date", "payment due"],
    ),
    (
        DocumentCategory::Certificate,
        CanonicalField::CertificationNumber,
        &["certificate number", "certificate no"],
    ),
    (
        DocumentCategory::Certificate,
        CanonicalField::DocumentDate,
        &["issue date", "date of issue"],
    ),
    (
        DocumentCategory::Certificate,
        CanonicalField::Deadline,
        &["valid until", "expiry date"],
    ),
];

/// Build `label: value` matcher.
///
/// A label must open a line or follow a separator, so "address" does not
/// fire inside "E-mail address". The value runs to the next comma,
/// semicolon or line break; numeric fields also accept "1.200,50".
fn label_regex(labels: &[&str], kind: ValueKind) -> Regex {
    let alternatives: Vec<String> = labels
        .iter()
        .map(|l| regex::escape(l).replace(' ', r"[ \t]+"))
        .collect();
    let value = match kind {
        ValueKind::Number | ValueKind::Integer => r"(\d(?:[\d.,]*\d)?[^,;\n\r]*|[^,;\n\r]+)",
        _ => r"([^,;\n\r]+)",
    };
    let pattern = format!(
        r"(?im)(?:^|[,;.|\t])[ \t]*(?:{})[ \t]*[:=][ \t]*{}",
        alternatives.join("|"),
        value
    );
    Regex::new(&pattern).unwrap()
}

static LABEL_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let mut rules = Vec::new();
    for (field, canonical, aliases) in LABELS {
        rules.push(Rule {
            field: *field,
            confidence: LABELED_CONFIDENCE,
            category: None,
            regex: label_regex(canonical, field.kind()),
        });
        if !aliases.is_empty() {
            rules.push(Rule {
                field: *field,
                confidence: ALIAS_CONFIDENCE,
                category: None,
                regex: label_regex(aliases, field.kind()),
            });
        }
    }
    for (category, field, labels) in CATEGORY_LABELS {
        rules.push(Rule {
            field: *field,
            confidence: CATEGORY_CONFIDENCE,
            category: Some(*category),
            regex: label_regex(labels, field.kind()),
        });
    }
    rules
});

/// Free-floating patterns: the whole match is the value.
static PATTERN_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let rule = |field, confidence, pattern: &str| Rule {
        field,
        confidence,
        category: None,
        regex: Regex::new(pattern).unwrap(),
    };
    vec![
        rule(
            CanonicalField::ContactEmail,
            EMAIL_CONFIDENCE,
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        ),
        rule(
            CanonicalField::Iban,
            IBAN_CONFIDENCE,
            r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,4})?\b",
        ),
        rule(
            CanonicalField::ContactPhone,
            PHONE_CONFIDENCE,
            r"\+\d{1,3}[ .-]?\(?\d{1,4}\)?(?:[ .-]?\d{2,4}){2,4}",
        ),
        rule(
            CanonicalField::DocumentDate,
            DATE_CONFIDENCE,
            r"\b\d{4}-\d{2}-\d{2}\b",
        ),
    ]
});

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$").unwrap());

/// Reject labeled values that cannot belong to the field.
fn plausible(field: CanonicalField, value: &str) -> bool {
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    match field {
        CanonicalField::ContactEmail => EMAIL.is_match(value),
        CanonicalField::ContactPhone => digits >= 6,
        CanonicalField::Iban => {
            let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            compact.len() >= 15
                && compact.chars().take(2).all(|c| c.is_ascii_alphabetic())
                && compact.chars().all(|c| c.is_ascii_alphanumeric())
        }
        CanonicalField::PostalCode
        | CanonicalField::FarmSizeHectares
        | CanonicalField::AmountRequested
        | CanonicalField::LivestockCount => digits > 0,
        _ => !value.contains('@'),
    }
}

fn clean_value(raw: &str) -> Option<&str> {
    let value = raw.trim().trim_end_matches('.').trim_end();
    if value.is_empty() || value.chars().count() > MAX_VALUE_CHARS {
        None
    } else {
        Some(value)
    }
}

struct Hit<'t> {
    confidence: f64,
    position: usize,
    value: &'t str,
}

/// Apply every rule for `category` to `text`.
///
/// Identical input always yields identical output. When several rules hit
/// the same field the highest confidence wins and ties keep the earliest
/// match. Candidates are ordered by field name.
pub fn extract_rules<'t>(text: &'t str, category: DocumentCategory) -> Vec<FieldCandidate> {
    let mut best: BTreeMap<&'static str, (CanonicalField, Hit<'t>)> = BTreeMap::new();

    let mut offer = |field: CanonicalField, hit: Hit<'t>| {
        let replace = match best.get(field.as_str()) {
            Some((_, current)) => {
                hit.confidence > current.confidence
                    || (hit.confidence == current.confidence && hit.position < current.position)
            }
            None => true,
        };
        if replace {
            best.insert(field.as_str(), (field, hit));
        }
    };

    for rule in LABEL_RULES.iter() {
        if rule.category.is_some_and(|c| c != category) {
            continue;
        }
        for caps in rule.regex.captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            let Some(value) = clean_value(m.as_str()) else {
                continue;
            };
            if !plausible(rule.field, value) {
                continue;
            }
            offer(
                rule.field,
                Hit {
                    confidence: rule.confidence,
                    position: m.start(),
                    value,
                },
            );
        }
    }

    for rule in PATTERN_RULES.iter() {
        for m in rule.regex.find_iter(text) {
            offer(
                rule.field,
                Hit {
                    confidence: rule.confidence,
                    position: m.start(),
                    value: m.as_str(),
                },
            );
        }
    }

    best.into_values()
        .map(|(field, hit)| {
            debug!(
                field = field.as_str(),
                confidence = hit.confidence,
                "rule matched"
            );
            FieldCandidate::new(
                FieldName::Canonical(field),
                FieldValue::coerce(field.kind(), hit.value),
                hit.confidence,
                FieldSource::RuleBased,
            )
        })
        .collect()
}

/// Stateless wrapper so the pipeline can hold rules behind a value.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleExtractor;

impl RuleExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str, category: DocumentCategory) -> Vec<FieldCandidate> {
        extract_rules(text, category)
    }
}
