//! Helper functions for text processing and value rendering.

use std::borrow::Cow;

/// Byte offset just past the first `max_chars` characters of `s`.
pub fn char_prefix_end(s: &str, max_chars: usize) -> usize {
    s.char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len())
}

/// Normalize line endings to `\n`.
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Cut `text` to `limit` characters and append `indicator`.
///
/// A limit of zero disables truncation. Text that is exactly `limit`
/// characters followed by the indicator is this function's own output and is
/// returned untouched, so truncating twice never stacks indicators.
pub fn truncate_with_indicator<'a>(text: &'a str, limit: usize, indicator: &str) -> Cow<'a, str> {
    if limit == 0 {
        return Cow::Borrowed(text);
    }
    let end = char_prefix_end(text, limit);
    if end == text.len() {
        return Cow::Borrowed(text);
    }
    if is_truncated(text, limit, indicator) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(end + indicator.len());
    out.push_str(&text[..end]);
    out.push_str(indicator);
    Cow::Owned(out)
}

/// Whether `text` is exactly `limit` characters followed by `indicator`.
pub fn is_truncated(text: &str, limit: usize, indicator: &str) -> bool {
    !indicator.is_empty()
        && text
            .strip_suffix(indicator)
            .is_some_and(|stem| stem.chars().count() == limit)
}

/// Quote a rendered value when it would break the row grammar.
///
/// Values containing a comma, double quote, backslash or line break, or with
/// leading or trailing whitespace, are wrapped in double quotes with `\\`,
/// `\"`, `\n` and `\r` escapes. Everything else is emitted as-is.
pub fn escape_value(value: &str) -> Cow<'_, str> {
    let needs_quotes = value.contains([',', '"', '\\', '\n', '\r'])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if !needs_quotes {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    Cow::Owned(out)
}

/// Render a number with at most `precision` decimals and no trailing zeros.
pub fn format_decimal(value: f64, precision: usize) -> String {
    let s = format!("{:.*}", precision, value);
    let s = if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    };
    if s == "-0" {
        "0".to_string()
    } else {
        s
    }
}

/// Render a JSON number without a spurious `.0` on whole values.
pub fn format_number(number: &serde_json::Number) -> String {
    if let Some(i) = number.as_i64() {
        return i.to_string();
    }
    if let Some(u) = number.as_u64() {
        return u.to_string();
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => number.to_string(),
    }
}
