//! Output validators.
//!
//! A validator inspects the primary text of a chat reply and either
//! accepts it (possibly transformed) or rejects it with a message and a
//! retry addendum the facade appends to the conversation before trying
//! again. Embedding replies are never validated.
//!
//! Three variants cover the common shapes:
//!
//! - [`Validator::structured`]: the reply must be (or contain) a JSON
//!   object or array, optionally checked against a [`Schema`] of required
//!   fields and their primitive types.
//! - [`Validator::free_text`]: a caller-supplied predicate. A panicking
//!   predicate is caught and reported as a validation failure.
//! - [`Validator::pattern`]: a regular-expression match; the matched
//!   substring becomes the accepted text.
//!
//! Outcomes are plain values, not errors: rejection is expected control
//! flow for the retry loop, and only the exhausted cap surfaces as
//! [`crate::error::ClientError::ValidationExhausted`].

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use regex::RegexBuilder;

use crate::error::ClientError;

/// Primitive type a schema field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

/// Required fields and their primitive types for structured validation.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, FieldType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name` to be present with the given type.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    fn check(&self, value: &serde_json::Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| "expected a JSON object".to_string())?;
        for (name, field_type) in &self.fields {
            match object.get(name) {
                None => return Err(format!("missing required field `{name}`")),
                Some(found) if !field_type.matches(found) => {
                    return Err(format!(
                        "field `{name}` must be a {}",
                        field_type.name()
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Human-readable restatement used in retry addenda.
    fn describe(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(name, field_type)| format!("`{name}` ({})", field_type.name()))
            .collect();
        fields.join(", ")
    }
}

type Predicate = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// A post-dispatch constraint on chat output.
#[derive(Clone)]
pub enum Validator {
    Structured {
        schema: Option<Schema>,
        /// Strict: the whole reply must parse. Otherwise the largest
        /// well-formed JSON substring is extracted.
        strict: bool,
    },
    FreeText {
        predicate: Predicate,
    },
    Pattern {
        pattern: String,
        regex: regex::Regex,
    },
}

/// The result of validating one reply.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// Accepted. `text` is the value handed back to the caller, which may
    /// be a transformation of the reply (canonical JSON, the matched
    /// substring). `value` carries the parsed structure when there is one.
    Pass {
        text: String,
        value: Option<serde_json::Value>,
    },
    /// Rejected. `addendum` is appended to the conversation as a user
    /// turn before the next attempt.
    Fail { message: String, addendum: String },
}

impl ValidationOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationOutcome::Pass { .. })
    }
}

impl Validator {
    /// Structured validator without a schema.
    pub fn structured(strict: bool) -> Self {
        Validator::Structured {
            schema: None,
            strict,
        }
    }

    /// Structured validator that also checks required fields.
    pub fn structured_with_schema(schema: Schema, strict: bool) -> Self {
        Validator::Structured {
            schema: Some(schema),
            strict,
        }
    }

    /// Free-text validator around a caller-supplied predicate.
    pub fn free_text<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        Validator::FreeText {
            predicate: Arc::new(predicate),
        }
    }

    /// Pattern validator. The pattern is compiled once at construction.
    pub fn pattern(pattern: &str, case_insensitive: bool) -> Result<Self, ClientError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| ClientError::config(format!("invalid validator pattern: {e}")))?;
        Ok(Validator::Pattern {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Judge one reply.
    pub fn validate(&self, text: &str) -> ValidationOutcome {
        match self {
            Validator::Structured { schema, strict } => validate_structured(text, schema, *strict),
            Validator::FreeText { predicate } => validate_free_text(text, predicate),
            Validator::Pattern { pattern, regex } => validate_pattern(text, pattern, regex),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Structured { schema, strict } => f
                .debug_struct("Structured")
                .field("schema", schema)
                .field("strict", strict)
                .finish(),
            Validator::FreeText { .. } => f.debug_struct("FreeText").finish_non_exhaustive(),
            Validator::Pattern { pattern, .. } => {
                f.debug_struct("Pattern").field("pattern", pattern).finish()
            }
        }
    }
}

fn structured_addendum(schema: &Option<Schema>) -> String {
    match schema {
        Some(schema) if !schema.describe().is_empty() => format!(
            "Respond with valid JSON only, with no surrounding prose. \
             The JSON object must contain the fields {}.",
            schema.describe()
        ),
        _ => "Respond with valid JSON only, with no surrounding prose.".to_string(),
    }
}

fn validate_structured(text: &str, schema: &Option<Schema>, strict: bool) -> ValidationOutcome {
    let parsed = if strict {
        parse_whole(text)
    } else {
        extract_json(text).ok_or_else(|| "no well-formed JSON value found".to_string())
    };

    let value = match parsed {
        Ok(value) => value,
        Err(message) => {
            return ValidationOutcome::Fail {
                message: format!("reply was not valid structured data: {message}"),
                addendum: structured_addendum(schema),
            };
        }
    };

    if let Some(schema) = schema {
        if let Err(message) = schema.check(&value) {
            return ValidationOutcome::Fail {
                message,
                addendum: structured_addendum(&Some(schema.clone())),
            };
        }
    }

    ValidationOutcome::Pass {
        text: value.to_string(),
        value: Some(value),
    }
}

fn parse_whole(text: &str) -> Result<serde_json::Value, String> {
    let value: serde_json::Value =
        serde_json::from_str(text.trim()).map_err(|e| e.to_string())?;
    if value.is_object() || value.is_array() {
        Ok(value)
    } else {
        Err("expected a JSON object or array".to_string())
    }
}

/// Find the largest balanced `{...}` or `[...]` substring that parses.
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let mut best: Option<(usize, serde_json::Value)> = None;
    for (start, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let Some(len) = balanced_len(&text[start..]) else {
            continue;
        };
        if best.as_ref().is_some_and(|(best_len, _)| len <= *best_len) {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[start..start + len]) {
            best = Some((len, value));
        }
    }
    best.map(|(_, value)| value)
}

/// Length of the balanced bracket region starting at the first byte, or
/// `None` if the brackets never close. String literals and escapes are
/// honored so braces inside strings do not count.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_free_text(text: &str, predicate: &Predicate) -> ValidationOutcome {
    match catch_unwind(AssertUnwindSafe(|| predicate(text))) {
        Ok(Ok(())) => ValidationOutcome::Pass {
            text: text.to_string(),
            value: None,
        },
        Ok(Err(message)) => ValidationOutcome::Fail {
            addendum: message.clone(),
            message,
        },
        Err(panic) => {
            let message = panic_message(&panic);
            ValidationOutcome::Fail {
                addendum: message.clone(),
                message,
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    eprintln!(
        "DEBUG is_str={} is_string={} is_box_str={} is_box_any={} is_cow={}",
        panic.is::<&str>(),
        panic.is::<String>(),
        panic.is::<Box<str>>(),
        panic.is::<Box<dyn std::any::Any + Send>>(),
        panic.is::<std::borrow::Cow<'static, str>>(),
    );
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "validator panicked".to_string()
    }
}

fn validate_pattern(text: &str, pattern: &str, regex: &regex::Regex) -> ValidationOutcome {
    match regex.find(text) {
        Some(found) => ValidationOutcome::Pass {
            text: found.as_str().to_string(),
            value: None,
        },
        None => ValidationOutcome::Fail {
            message: format!("reply did not match the required pattern `{pattern}`"),
            addendum: format!(
                "Your reply must match the pattern `{pattern}`. \
                 Respond with text matching it exactly."
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_catch_unwind_repro() {
        let p: Predicate = Arc::new(|_: &str| -> Result<(), String> { panic!("boom") });
        let outcome = validate_free_text("x", &p);
        eprintln!("RAW outcome = {outcome:?}");
    }

    #[test]
    fn strict_mode_requires_the_whole_text_to_parse() {
        let validator = Validator::structured(true);
        assert!(validator.validate(r#"{"result": 42}"#).is_pass());
        assert!(!validator.validate(r#"result: 42"#).is_pass());
        assert!(!validator.validate(r#"sure! {"result": 42}"#).is_pass());
        // Bare scalars are not key/value or array structures.
        assert!(!validator.validate("42").is_pass());
    }

    #[test]
    fn extract_mode_finds_embedded_json() {
        let validator = Validator::structured(false);
        match validator.validate(r#"Here you go: {"a": [1, 2], "b": "x}y"} enjoy"#) {
            ValidationOutcome::Pass { value, .. } => {
                assert_eq!(value.unwrap(), json!({"a": [1, 2], "b": "x}y"}));
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn extract_mode_prefers_the_largest_candidate() {
        let validator = Validator::structured(false);
        match validator.validate(r#"{"a": 1} and also {"a": 1, "b": 2, "c": 3}"#) {
            ValidationOutcome::Pass { value, .. } => {
                assert_eq!(value.unwrap(), json!({"a": 1, "b": 2, "c": 3}));
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn schema_checks_required_fields_and_types() {
        let schema = Schema::new()
            .field("result", FieldType::Number)
            .field("label", FieldType::String);
        let validator = Validator::structured_with_schema(schema, true);

        assert!(validator
            .validate(r#"{"result": 42, "label": "x"}"#)
            .is_pass());

        match validator.validate(r#"{"result": "42", "label": "x"}"#) {
            ValidationOutcome::Fail { message, addendum } => {
                assert!(message.contains("`result`"), "{message}");
                assert!(addendum.contains("`result` (number)"), "{addendum}");
            }
            other => panic!("expected fail, got {other:?}"),
        }

        match validator.validate(r#"{"label": "x"}"#) {
            ValidationOutcome::Fail { message, .. } => {
                assert!(message.contains("missing required field"), "{message}");
            }
            other => panic!("expected fail, got {other:?}"),
        }
    }

    #[test]
    fn strict_round_trip_is_identity() {
        let source = json!({"result": 42, "items": ["a", "b"], "nested": {"ok": true}});
        let validator = Validator::structured(true);
        match validator.validate(&source.to_string()) {
            ValidationOutcome::Pass { value, text } => {
                assert_eq!(value.unwrap(), source);
                // The canonical text parses back to the same value.
                assert_eq!(
                    serde_json::from_str::<serde_json::Value>(&text).unwrap(),
                    source
                );
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn free_text_messages_travel_verbatim() {
        let validator = Validator::free_text(|text| {
            if text.contains("yes") {
                Ok(())
            } else {
                Err("the reply must contain the word yes".to_string())
            }
        });

        assert!(validator.validate("yes indeed").is_pass());
        match validator.validate("no") {
            ValidationOutcome::Fail { message, addendum } => {
                assert_eq!(message, "the reply must contain the word yes");
                assert_eq!(addendum, message);
            }
            other => panic!("expected fail, got {other:?}"),
        }
    }

    #[test]
    fn panicking_predicate_becomes_a_failure() {
        let validator = Validator::free_text(|_| panic!("boom"));
        match validator.validate("anything") {
            ValidationOutcome::Fail { message, .. } => assert_eq!(message, "boom"),
            other => panic!("expected fail, got {other:?}"),
        }
    }

    #[test]
    fn pattern_returns_the_matched_substring() {
        let validator = Validator::pattern(r"\d{3}-\d{4}", false).unwrap();
        match validator.validate("call 555-1234 today") {
            ValidationOutcome::Pass { text, .. } => assert_eq!(text, "555-1234"),
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn pattern_validation_is_idempotent() {
        let validator = Validator::pattern("ok", true).unwrap();
        let first = match validator.validate("OK then") {
            ValidationOutcome::Pass { text, .. } => text,
            other => panic!("expected pass, got {other:?}"),
        };
        let second = match validator.validate("OK then") {
            ValidationOutcome::Pass { text, .. } => text,
            other => panic!("expected pass, got {other:?}"),
        };
        assert_eq!(first, second);
        assert_eq!(first, "OK");
    }

    #[test]
    fn pattern_mismatch_restates_the_pattern() {
        let validator = Validator::pattern("^done$", false).unwrap();
        match validator.validate("not quite") {
            ValidationOutcome::Fail { addendum, .. } => {
                assert!(addendum.contains("^done$"), "{addendum}");
            }
            other => panic!("expected fail, got {other:?}"),
        }
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        assert!(Validator::pattern("(unclosed", false).is_err());
    }
}
