//! Value normalization
//!
//! Controllers report most values as strings ("true", "65001", "Multicast")
//! while callers write native JSON. Both sides are brought to a canonical
//! form before comparison; raw wire values are never compared directly.

use regex::Regex;
use sdk::ReconcileError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// How a field's values are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Bool,
    Int,
    Mac,
    /// Case-insensitive enumeration
    Enum,
    Text,
}

/// Canonical form of one value
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    Bool(bool),
    Int(i64),
    Text(String),
    Other(Value),
}

/// Parse a boolean from a JSON bool or a case-insensitive "true"/"false"
pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse an integer from a JSON integer or a numeric string
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:[0-9a-fA-F]{2}(?::[0-9a-fA-F]{2}){5}|[0-9a-fA-F]{2}(?:-[0-9a-fA-F]{2}){5}|[0-9a-fA-F]{4}\.[0-9a-fA-F]{4}\.[0-9a-fA-F]{4}|[0-9a-fA-F]{12})$",
        )
        .expect("Invalid MAC pattern")
    })
}

/// Canonical MAC form: lowercase dotted `aabb.ccdd.eeff`
///
/// Accepts colon, dash and dot separated forms and 12 bare hex digits.
pub fn canonical_mac(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if !mac_pattern().is_match(raw) {
        return None;
    }
    let digits: String = raw
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    Some(format!(
        "{}.{}.{}",
        &digits[0..4],
        &digits[4..8],
        &digits[8..12]
    ))
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn canonical_text(value: &Value) -> Canonical {
    match text_of(value) {
        Some(text) => Canonical::Text(text),
        None => Canonical::Other(value.clone()),
    }
}

/// Canonicalize a value that came from the controller
///
/// Controller values are trusted as-is: anything that does not parse as the
/// expected kind is kept verbatim, so it simply compares unequal.
pub fn canonicalize_current(kind: FieldKind, value: &Value) -> Canonical {
    match kind {
        FieldKind::Bool => parse_bool(value).map_or_else(|| canonical_text(value), Canonical::Bool),
        FieldKind::Int => parse_int(value).map_or_else(|| canonical_text(value), Canonical::Int),
        FieldKind::Mac => match value.as_str().and_then(canonical_mac) {
            Some(mac) => Canonical::Text(mac),
            None => canonical_text(value),
        },
        FieldKind::Enum => match text_of(value) {
            Some(text) => Canonical::Text(text.to_ascii_lowercase()),
            None => Canonical::Other(value.clone()),
        },
        FieldKind::Text => canonical_text(value),
    }
}

/// Canonicalize a value the caller asked for
///
/// # Errors
///
/// Returns `InvalidValue` when the value cannot be read as the field's kind.
pub fn canonicalize_desired(
    field: &str,
    kind: FieldKind,
    value: &Value,
) -> Result<Canonical, ReconcileError> {
    let invalid = |expected: &str| {
        ReconcileError::invalid_value(field, format!("expected {}, got {}", expected, value))
    };

    match kind {
        FieldKind::Bool => parse_bool(value)
            .map(Canonical::Bool)
            .ok_or_else(|| invalid("a boolean")),
        FieldKind::Int => parse_int(value)
            .map(Canonical::Int)
            .ok_or_else(|| invalid("an integer")),
        FieldKind::Mac => value
            .as_str()
            .and_then(canonical_mac)
            .map(Canonical::Text)
            .ok_or_else(|| invalid("a MAC address")),
        FieldKind::Enum => text_of(value)
            .map(|text| Canonical::Text(text.to_ascii_lowercase()))
            .ok_or_else(|| invalid("a string")),
        FieldKind::Text => Ok(canonical_text(value)),
    }
}

/// Pick a kind for a field the descriptor does not type
///
/// Booleans win when both sides read as booleans, then integers; otherwise
/// values are compared as text.
pub fn infer_kind(desired: &Value, current: &Value) -> FieldKind {
    if parse_bool(desired).is_some() && parse_bool(current).is_some() {
        FieldKind::Bool
    } else if parse_int(desired).is_some() && parse_int(current).is_some() {
        FieldKind::Int
    } else {
        FieldKind::Text
    }
}

/// Whether the desired value differs from the current one after normalization
///
/// # Errors
///
/// Returns `InvalidValue` when an explicitly typed desired value does not
/// parse as its kind.
pub fn differs(
    field: &str,
    kind: Option<FieldKind>,
    desired: &Value,
    current: &Value,
) -> Result<bool, ReconcileError> {
    let kind = kind.unwrap_or_else(|| infer_kind(desired, current));
    let wanted = canonicalize_desired(field, kind, desired)?;
    let present = canonicalize_current(kind, current);
    Ok(wanted != present)
}
