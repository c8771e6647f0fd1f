//! Field-class formatting for individual TOON values.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::encoder::ToonEncodingOptions;
use crate::error::{EncodingCode, ToonError};
use crate::helpers::{format_decimal, format_number, normalize_line_endings, truncate_with_indicator};
use crate::schema::FieldClass;

/// Decimal places kept for progress ratios.
pub const PROGRESS_PRECISION: usize = 2;

/// Prefix used by a numeric class, if any.
pub fn class_prefix(class: FieldClass) -> Option<&'static str> {
    match class {
        FieldClass::Priority => Some("p"),
        FieldClass::Estimate => Some("e"),
        FieldClass::Cycle => Some("c"),
        _ => None,
    }
}

fn unsupported(class: FieldClass, value: &Value) -> ToonError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ToonError::encoding(
        EncodingCode::UnsupportedType,
        format!("Cannot render {} value as {:?}", kind, class),
    )
}

/// Estimates may be fractional; priorities and cycles are whole numbers.
fn is_class_number(class: FieldClass, text: &str) -> bool {
    if class == FieldClass::Estimate {
        text.parse::<f64>().is_ok_and(f64::is_finite)
    } else {
        text.parse::<i64>().is_ok()
    }
}

fn is_prefixed_number(class: FieldClass, text: &str, prefix: &str) -> bool {
    text.strip_prefix(prefix)
        .is_some_and(|rest| is_class_number(class, rest))
}

fn format_prefixed(class: FieldClass, prefix: &str, value: &Value) -> Result<String, ToonError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Number(n) => {
            if class != FieldClass::Estimate && n.as_i64().is_none() && n.as_u64().is_none() {
                return Err(unsupported(class, value));
            }
            Ok(format!("{}{}", prefix, format_number(n)))
        }
        Value::String(s) if s.is_empty() => Ok(String::new()),
        Value::String(s) if is_prefixed_number(class, s, prefix) => Ok(s.clone()),
        Value::String(s) if is_class_number(class, s.trim()) => match s.trim().parse::<f64>() {
            Ok(n) => Ok(format!("{}{}", prefix, format_decimal(n, 6))),
            Err(_) => Err(unsupported(class, value)),
        },
        _ => Err(unsupported(class, value)),
    }
}

fn format_date(value: &Value) -> Result<String, ToonError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.date_naive().format("%Y-%m-%d").to_string());
            }
            let head = s.get(..10).unwrap_or(s);
            match NaiveDate::parse_from_str(head, "%Y-%m-%d") {
                Ok(date) => Ok(date.format("%Y-%m-%d").to_string()),
                // Unparseable dates pass through untouched rather than losing data
                Err(_) => Ok(s.clone()),
            }
        }
        other => Err(unsupported(FieldClass::Date, other)),
    }
}

pub(crate) fn format_scalar_text(class: FieldClass, value: &Value) -> Result<Cow<'_, str>, ToonError> {
    match value {
        Value::Null => Ok(Cow::Borrowed("")),
        Value::String(s) => Ok(normalize_line_endings(s)),
        Value::Number(n) => Ok(Cow::Owned(format_number(n))),
        Value::Bool(b) => Ok(Cow::Borrowed(if *b { "true" } else { "false" })),
        other => Err(unsupported(class, other)),
    }
}

/// Render one value according to its field class.
///
/// Absent values (`null`) always render as the empty string. Truncation only
/// applies to text classes; the returned string is not yet escaped.
pub fn format_value(
    class: FieldClass,
    value: &Value,
    options: &ToonEncodingOptions,
) -> Result<String, ToonError> {
    match class {
        FieldClass::Priority => format_prefixed(class, "p", value),
        FieldClass::Estimate => format_prefixed(class, "e", value),
        FieldClass::Cycle => format_prefixed(class, "c", value),
        FieldClass::Date => format_date(value),
        FieldClass::Timestamp => match value {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            other => Err(unsupported(class, other)),
        },
        FieldClass::Boolean => match value {
            Value::Null => Ok(String::new()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok("true".to_string()),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok("false".to_string()),
            other => Err(unsupported(class, other)),
        },
        FieldClass::Progress => match value {
            Value::Null => Ok(String::new()),
            Value::Number(n) => n
                .as_f64()
                .map(|f| format_decimal(f, PROGRESS_PRECISION))
                .ok_or_else(|| unsupported(class, value)),
            other => Err(unsupported(class, other)),
        },
        FieldClass::Number => match value {
            Value::Null => Ok(String::new()),
            Value::Number(n) => Ok(format_number(n)),
            other => Err(unsupported(class, other)),
        },
        FieldClass::Project => {
            let text = format_scalar_text(class, value)?;
            let mapped = options
                .project_slugs
                .as_ref()
                .and_then(|slugs| slugs.get(text.as_ref()));
            match mapped {
                Some(key) => Ok(key.clone()),
                None => Ok(truncate_text(class, &text, options)),
            }
        }
        FieldClass::Title | FieldClass::Description | FieldClass::Text => {
            let text = format_scalar_text(class, value)?;
            if matches!(value, Value::String(_)) {
                Ok(truncate_text(class, &text, options))
            } else {
                Ok(text.into_owned())
            }
        }
    }
}

fn truncate_text(class: FieldClass, text: &str, options: &ToonEncodingOptions) -> String {
    let limit = options.truncation.limit_for(class);
    truncate_with_indicator(text, limit, &options.truncation_indicator).into_owned()
}

/// Invert a prefixed numeric rendering (`p2` → `2`).
///
/// The empty string decodes to `None`, matching the encoder's absence
/// convention. Text that does not carry the class prefix yields `None`.
pub fn decode_prefixed(class: FieldClass, text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    let prefix = class_prefix(class)?;
    text.strip_prefix(prefix)?.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn opts() -> ToonEncodingOptions {
        ToonEncodingOptions::default()
    }

    #[test]
    fn test_priority_round_trip() {
        let encoded = format_value(FieldClass::Priority, &json!(2), &opts()).unwrap();
        assert_eq!(encoded, "p2");
        assert_eq!(decode_prefixed(FieldClass::Priority, &encoded), Some(2.0));
    }

    #[test]
    fn test_absent_vs_zero() {
        let absent = format_value(FieldClass::Priority, &Value::Null, &opts()).unwrap();
        let zero = format_value(FieldClass::Priority, &json!(0), &opts()).unwrap();
        assert_eq!(absent, "");
        assert_eq!(zero, "p0");
        assert_eq!(decode_prefixed(FieldClass::Priority, &absent), None);
        assert_eq!(decode_prefixed(FieldClass::Priority, &zero), Some(0.0));
    }

    #[test]
    fn test_estimate_and_cycle() {
        assert_eq!(format_value(FieldClass::Estimate, &json!(3), &opts()).unwrap(), "e3");
        assert_eq!(format_value(FieldClass::Estimate, &json!(0.5), &opts()).unwrap(), "e0.5");
        assert_eq!(format_value(FieldClass::Cycle, &json!(5), &opts()).unwrap(), "c5");
        assert_eq!(format_value(FieldClass::Cycle, &Value::Null, &opts()).unwrap(), "");
        // Already-encoded values pass through unchanged
        assert_eq!(format_value(FieldClass::Cycle, &json!("c5"), &opts()).unwrap(), "c5");
    }

    #[test]
    fn test_priority_rejects_fractions_and_junk() {
        let err = format_value(FieldClass::Priority, &json!(1.5), &opts()).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
        let err = format_value(FieldClass::Priority, &json!("urgent"), &opts()).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
        // Prefixed strings get the same checks as raw numbers
        for bad in ["p1.5", "pNaN", "p"] {
            let err = format_value(FieldClass::Priority, &json!(bad), &opts()).unwrap_err();
            assert_eq!(err.code(), "UNSUPPORTED_TYPE", "{}", bad);
        }
        for bad in ["einf", "eNaN", "inf"] {
            let err = format_value(FieldClass::Estimate, &json!(bad), &opts()).unwrap_err();
            assert_eq!(err.code(), "UNSUPPORTED_TYPE", "{}", bad);
        }
        assert!(format_value(FieldClass::Cycle, &json!("c2.5"), &opts()).is_err());
        assert_eq!(format_value(FieldClass::Priority, &json!("p3"), &opts()).unwrap(), "p3");
        assert_eq!(format_value(FieldClass::Priority, &json!("3"), &opts()).unwrap(), "p3");
        assert_eq!(format_value(FieldClass::Estimate, &json!("e1.5"), &opts()).unwrap(), "e1.5");
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            format_value(FieldClass::Date, &json!("2024-03-15T00:00:00.000Z"), &opts()).unwrap(),
            "2024-03-15"
        );
        assert_eq!(format_value(FieldClass::Date, &json!("2024-03-15"), &opts()).unwrap(), "2024-03-15");
        assert_eq!(
            format_value(FieldClass::Timestamp, &json!("2024-03-15T10:20:30.000Z"), &opts()).unwrap(),
            "2024-03-15T10:20:30.000Z"
        );
        assert_eq!(format_value(FieldClass::Date, &json!("soon"), &opts()).unwrap(), "soon");
        assert!(format_value(FieldClass::Date, &json!(17), &opts()).is_err());
    }

    #[test]
    fn test_booleans_and_progress() {
        assert_eq!(format_value(FieldClass::Boolean, &json!(true), &opts()).unwrap(), "true");
        assert_eq!(format_value(FieldClass::Text, &json!(false), &opts()).unwrap(), "false");
        assert_eq!(format_value(FieldClass::Progress, &json!(0.66666), &opts()).unwrap(), "0.67");
        assert_eq!(format_value(FieldClass::Progress, &json!(1), &opts()).unwrap(), "1");
    }

    #[test]
    fn test_text_truncation_by_class() {
        let mut options = opts();
        options.truncation.title = 5;
        options.truncation.description = 8;
        let long = json!("abcdefghijklmnop");
        assert_eq!(format_value(FieldClass::Title, &long, &options).unwrap(), "abcde...");
        assert_eq!(format_value(FieldClass::Description, &long, &options).unwrap(), "abcdefgh...");
        // Numbers are never truncated
        assert_eq!(format_value(FieldClass::Number, &json!(1234567890123_i64), &options).unwrap(), "1234567890123");
    }

    #[test]
    fn test_nested_values_are_unsupported() {
        let err = format_value(FieldClass::Text, &json!(["a", "b"]), &opts()).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
        let err = format_value(FieldClass::Text, &json!({"a": 1}), &opts()).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
    }

    #[test]
    fn test_project_slug_mapping() {
        let mut options = opts();
        options.project_slugs = Some(HashMap::from([("launch-2f1c".to_string(), "pr1".to_string())]));
        assert_eq!(format_value(FieldClass::Project, &json!("launch-2f1c"), &options).unwrap(), "pr1");
        assert_eq!(format_value(FieldClass::Project, &json!("other"), &options).unwrap(), "other");
    }
}
