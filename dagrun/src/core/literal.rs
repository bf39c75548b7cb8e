//! Safe literal evaluation for raw argument text.
//!
//! Plan text is produced by a language model, so argument values arrive as
//! unquoted fragments: numbers, quoted strings, list literals, or free
//! text. This is a total function: anything that does not parse cleanly is
//! kept verbatim as a string, never an error.

use serde_json::{Number, Value};

/// Parse a raw argument fragment into a value.
///
/// Recognized forms: integers, floats, booleans (`true`/`True`), nulls
/// (`null`/`None`), single- or double-quoted strings, and (nested) list
/// literals. Everything else stays as the trimmed raw text.
pub fn parse_literal(raw: &str) -> Value {
    let text = raw.trim();
    if text.is_empty() {
        return Value::String(String::new());
    }

    match text {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        "null" | "None" => return Value::Null,
        _ => {}
    }

    if let Ok(int) = text.parse::<i64>() {
        return Value::Number(Number::from(int));
    }
    if let Ok(float) = text.parse::<f64>()
        && let Some(number) = Number::from_f64(float)
    {
        return Value::Number(number);
    }

    if let Some(inner) = quoted_inner(text) {
        return Value::String(unescape(inner));
    }

    if text.starts_with('[') && text.ends_with(']') && text.len() >= 2 {
        let elements = split_top_level(&text[1..text.len() - 1]);
        let values: Vec<Value> = elements.iter().map(|e| parse_literal(e)).collect();
        return Value::Array(values);
    }

    Value::String(text.to_string())
}

/// Return the inner text of a fully quoted fragment, or `None`.
fn quoted_inner(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if text.len() < 2 {
        return None;
    }
    let quote = bytes[0];
    if (quote != b'"' && quote != b'\'') || bytes[text.len() - 1] != quote {
        return None;
    }
    // Reject `"a" + "b"` style fragments where the quotes do not span the
    // whole text: an unescaped closing quote before the end disqualifies.
    let inner = &text[1..text.len() - 1];
    let mut escaped = false;
    for byte in inner.bytes() {
        if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == quote {
            return None;
        }
    }
    Some(inner)
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Split on commas that sit at nesting depth zero, respecting quotes.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in text.chars() {
        if let Some(open) = quote {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '[' | '(' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts
}
