//! Default prompt templates.

/// Default prompt for structured field extraction.
///
/// Placeholders: `{category}`, `{fields}`, `{content}`.
pub const DEFAULT_FIELD_PROMPT: &str = r#"You extract structured data from agricultural subsidy documents.

Document category: {category}

Known field names: {fields}
Use one of the known names when it fits. For anything else use a name of the form custom_<name>.

Return ONLY a JSON object of the form:
{"fields": [{"name": "<field name>", "value": "<value as written in the document>", "confidence": <number between 0 and 1>}]}

Omit fields that are not present. Do not guess values. Dates should be written as YYYY-MM-DD when possible.

DOCUMENT:
{content}

JSON:"#;
