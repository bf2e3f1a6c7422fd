//! Helpers over the JSON value tree that flows through every step.
//!
//! Step inputs and outputs are plain `serde_json::Value`s (string, number,
//! boolean, null, array, object). This module adds the coercions the
//! resolver and the branch evaluator share.

use serde_json::{Number, Value};

/// Scheme prefixes marking an externalized payload reference.
///
/// A string starting with one of these stands in for out-of-band content
/// (a stored file, an inline binary blob) and is an atomic leaf: it is
/// never scanned for templates, re-encoded or expanded.
pub const EXTERNAL_REF_SCHEMES: &[&str] = &["file://", "memory://"];

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub fn is_external_ref(text: &str) -> bool {
    EXTERNAL_REF_SCHEMES
        .iter()
        .any(|scheme| text.starts_with(scheme))
}

/// Build a JSON number from a float, preferring an integer representation
/// when the value is integral. Non-finite values have no JSON form.
pub fn number_value(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Some(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n).map(Value::Number)
}

pub trait ValueExt {
    /// True for strings carrying an externalized payload reference.
    fn is_external_ref(&self) -> bool;

    /// Natural text form: strings verbatim, numbers and booleans as
    /// literals, null as empty text, arrays and objects as compact JSON.
    fn to_text(&self) -> String;

    /// Null or the empty string.
    fn is_empty_value(&self) -> bool;

    fn is_truthy(&self) -> bool;

    /// Numeric coercion: numbers, numeric strings and booleans.
    fn to_number(&self) -> Option<f64>;
}

impl ValueExt for Value {
    fn is_external_ref(&self) -> bool {
        matches!(self, Value::String(s) if is_external_ref(s))
    }

    fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }

    fn is_empty_value(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.eq_ignore_ascii_case("false") {
                    false
                } else {
                    !trimmed.is_empty()
                }
            }
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    fn to_number(&self) -> Option<f64> {
        let n = match self {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok()?
            }
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            _ => return None,
        };
        n.is_finite().then_some(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_text_renders_compact_json_for_containers() {
        assert_eq!(json!([5, "a"]).to_text(), r#"[5,"a"]"#);
        assert_eq!(json!({"k": 1}).to_text(), r#"{"k":1}"#);
        assert_eq!(json!(5).to_text(), "5");
        assert_eq!(json!(2.5).to_text(), "2.5");
        assert_eq!(Value::Null.to_text(), "");
    }

    #[test]
    fn test_number_value_prefers_integers() {
        assert_eq!(number_value(3.0), Some(json!(3)));
        assert_eq!(number_value(0.5), Some(json!(0.5)));
        assert_eq!(number_value(f64::NAN), None);
        assert_eq!(number_value(f64::INFINITY), None);
    }

    #[test]
    fn test_to_number_rejects_non_numeric_text() {
        assert_eq!(json!("12").to_number(), Some(12.0));
        assert_eq!(json!(" 1.5 ").to_number(), Some(1.5));
        assert_eq!(json!("abc").to_number(), None);
        assert_eq!(json!("").to_number(), None);
        assert_eq!(json!("inf").to_number(), None);
        assert_eq!(Value::Null.to_number(), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(json!(true).is_truthy());
        assert!(json!("true").is_truthy());
        assert!(!json!("FALSE").is_truthy());
        assert!(!json!(0).is_truthy());
        assert!(!json!("").is_truthy());
        assert!(json!([]).is_truthy());
    }

    #[test]
    fn test_external_ref_detection() {
        assert!(json!("file://abc").is_external_ref());
        assert!(json!("memory://{\"fileName\":\"a.txt\"}").is_external_ref());
        assert!(!json!("https://example.com").is_external_ref());
        assert!(!json!(1).is_external_ref());
    }
}
