//! Extraction rules that pull a typed value out of a raw tool result.
//!
//! Tool servers answer with structured records or with stringified content,
//! depending on the transport. Rules are pure: the same raw input always
//! yields the same value or the same failure kind.

use regex::Regex;
use serde_json::Value;

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionRule {
    /// Pull a named field from a structured result. When the raw result is a
    /// string, a JSON parse is attempted first and the labeled-value pattern
    /// is used as a last resort.
    Field { name: String },
    /// Match a `"label": "value"` (or `label: value`) pair in unstructured
    /// text.
    Pattern { label: String },
}

impl ExtractionRule {
    pub fn field(name: impl Into<String>) -> Self {
        ExtractionRule::Field { name: name.into() }
    }

    pub fn pattern(label: impl Into<String>) -> Self {
        ExtractionRule::Pattern { label: label.into() }
    }

    pub fn extract(&self, raw: &Value) -> Result<Value> {
        match self {
            ExtractionRule::Field { name } => extract_field(name, raw),
            ExtractionRule::Pattern { label } => match raw {
                Value::String(text) => match_labeled_value(label, text)
                    .ok_or_else(|| FlowError::PatternNotFound(label.clone())),
                other => match_labeled_value(label, &other.to_string())
                    .ok_or_else(|| FlowError::PatternNotFound(label.clone())),
            },
        }
    }
}

fn extract_field(name: &str, raw: &Value) -> Result<Value> {
    match raw {
        Value::Object(map) => map
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::FieldMissing(name.to_string())),
        Value::String(text) => {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
                return map
                    .get(name)
                    .cloned()
                    .ok_or_else(|| FlowError::FieldMissing(name.to_string()));
            }
            match_labeled_value(name, text).ok_or_else(|| FlowError::FieldMissing(name.to_string()))
        }
        _ => Err(FlowError::FieldMissing(name.to_string())),
    }
}

/// Find `"label": "value"` or `label: value` in free text and return the
/// value. Quoted values may contain anything but quotes; bare values stop at
/// whitespace or a delimiter.
fn match_labeled_value(label: &str, text: &str) -> Option<Value> {
    let escaped = regex::escape(label);
    let pattern = format!(
        r#""?{escaped}"?\s*[:=]\s*(?:"([^"]*)"|([^\s,}}]+))"#
    );
    // The pattern is built from an escaped literal; it always compiles.
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    let value = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())?;
    Some(Value::String(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_from_structured_result() {
        let raw = json!({"SOC_ID": "SOCIETE_TEST_123", "SOC_NOM": "Societe Alpha Test"});
        let rule = ExtractionRule::field("SOC_ID");
        assert_eq!(rule.extract(&raw).unwrap(), json!("SOCIETE_TEST_123"));
    }

    #[test]
    fn field_missing_from_structured_result() {
        let raw = json!({"SOC_NOM": "Societe Alpha Test"});
        let err = ExtractionRule::field("SOC_ID").extract(&raw).unwrap_err();
        assert!(matches!(err, FlowError::FieldMissing(f) if f == "SOC_ID"));
    }

    #[test]
    fn field_parses_json_carried_in_text() {
        let raw = json!(r#"{"SOC_ID": "SOCIETE_TEST_123", "SOC_ETAT": "A"}"#);
        let rule = ExtractionRule::field("SOC_ID");
        assert_eq!(rule.extract(&raw).unwrap(), json!("SOCIETE_TEST_123"));
    }

    #[test]
    fn field_falls_back_to_pattern_on_plain_text() {
        let raw = json!("row 1 -> SOC_ID: SOCIETE_TEST_123 (active)");
        let rule = ExtractionRule::field("SOC_ID");
        assert_eq!(rule.extract(&raw).unwrap(), json!("SOCIETE_TEST_123"));
    }

    #[test]
    fn pattern_matches_quoted_value() {
        let raw = json!(r#"Raw tool output: "SOC_ID": "SOCIETE_TEST_123", more text"#);
        let rule = ExtractionRule::pattern("SOC_ID");
        assert_eq!(rule.extract(&raw).unwrap(), json!("SOCIETE_TEST_123"));
    }

    #[test]
    fn pattern_not_found_in_text() {
        let raw = json!("no identifiers here");
        let err = ExtractionRule::pattern("SOC_ID").extract(&raw).unwrap_err();
        assert!(matches!(err, FlowError::PatternNotFound(l) if l == "SOC_ID"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let raw = json!({"id": "X123"});
        let rule = ExtractionRule::field("id");
        assert_eq!(rule.extract(&raw).unwrap(), rule.extract(&raw).unwrap());

        let missing = json!({"name": "Acme"});
        let first = rule.extract(&missing).unwrap_err();
        let second = rule.extract(&missing).unwrap_err();
        assert_eq!(first.kind(), second.kind());
    }
}
