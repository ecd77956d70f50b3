// Helpers over the dynamic context model. The execution context is
// arbitrary nested JSON, so comparisons carry explicit coercion rules:
// numbers compare numerically regardless of integer/float representation,
// mismatched types compare as unequal/unordered instead of panicking.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::canonical::{canonicalize, parse_iso};

/// Walk a dotted path (`a.b.c`) through nested objects. Any miss along the
/// way resolves to `None`.
pub fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Resolve a dotted path to an owned value, with null standing in for a
/// missing binding.
pub fn resolve_path(context: &Value, path: &str) -> Value {
    lookup_path(context, path).cloned().unwrap_or(Value::Null)
}

/// Truthiness of a JSON value: null, false, zero, the empty string and
/// empty collections are falsy, everything else is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Equality with cross-representation numeric comparison: `25000` equals
/// `25000.0`. Non-number values use structural equality.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(lf), Some(rf)) => lf == rf,
            _ => l == r,
        },
        _ => left == right,
    }
}

/// Ordered comparison. Only like-typed scalars are ordered; anything else
/// is `None`, which comparison operators treat as `false`.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            l.as_f64()?.partial_cmp(&r.as_f64()?)
        }
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// String form used by pattern operators: raw string content for strings,
/// JSON text for scalars, canonical JSON for collections.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => canonicalize(other),
    }
}

/// Interpret a value as a UTC timestamp if it is an ISO-8601 string.
pub fn value_as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_iso(s),
        _ => None,
    }
}

/// Interpret a value as a duration in seconds.
pub fn value_as_seconds(value: &Value) -> Option<f64> {
    value.as_f64()
}
