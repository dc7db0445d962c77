//! Structural flattening of XML elements into JSON-like values.

use serde_json::{Map, Number, Value};

use crate::xml::Element;

/// Key under which text mixed with child elements or attributes is stored.
pub const TEXT_KEY: &str = "#text";

/// Prefix marking attribute keys.
pub const ATTR_PREFIX: char = '@';

/// Convert an element into a nested value.
///
/// - attributes become `@name` keys,
/// - child elements are keyed by their qualified name; repeats collapse into
///   an array in document order,
/// - text beside attributes or children goes under `#text`,
/// - an element with only text becomes that (coerced) scalar,
/// - an element with nothing at all becomes `null`.
///
/// Whitespace-only text counts as no text.
pub fn flatten(element: &Element) -> Value {
    let text = element.text();
    let text = if text.trim().is_empty() {
        None
    } else {
        Some(text)
    };

    if element.attributes.is_empty() && element.elements().next().is_none() {
        return text.map_or(Value::Null, |t| coerce(&t));
    }

    let mut map = Map::new();
    for attr in &element.attributes {
        map.insert(
            format!("{ATTR_PREFIX}{}", attr.qualified_name()),
            coerce(&attr.value),
        );
    }

    for child in element.elements() {
        let key = child.qualified_name();
        let value = flatten(child);
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }

    if let Some(text) = text {
        map.insert(TEXT_KEY.to_string(), coerce(&text));
    }
    Value::Object(map)
}

/// Coerce text to a boolean or number when it reads as one.
pub fn coerce(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::Number(n.into());
    }
    if is_decimal_literal(trimmed) {
        if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

/// `-12.5`, `3.`, `.5`, `1e3`; not `inf`, `NaN` or empty strings.
fn is_decimal_literal(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mantissa = body.split(['e', 'E']).next().unwrap_or_default();
    !mantissa.is_empty()
        && mantissa.chars().any(|c| c.is_ascii_digit())
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'))
}

/// Render a flattened scalar back to text. Arrays and objects yield their
/// `#text` entry, if any.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => map.get(TEXT_KEY).map(value_text).unwrap_or_default(),
        Value::Array(_) => String::new(),
    }
}

/// View a value that may be a single item or an array as a list.
pub fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}
