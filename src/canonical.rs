// Canonical JSON and content hashing. Every hash in the SDK goes through
// the canonicalizer so that re-hashing the same logical value always yields
// the same digest: object keys sorted lexicographically, no insignificant
// whitespace, numbers in serde_json's shortest round-trip form.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value in canonical form.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| *key);
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// SHA-256 of a string, as lowercase hex.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a value's canonical JSON form.
pub fn content_hash(value: &Value) -> String {
    sha256_hex(&canonicalize(value))
}

/// MD5 of a string, as lowercase hex. Used for cache keys and short derived
/// record ids, never for integrity.
pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Current UTC time as ISO-8601 with microseconds and a `+00:00` suffix.
/// Lexicographic order on these strings equals chronological order.
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parse an ISO-8601 timestamp, accepting both `Z` and offset suffixes.
pub fn parse_iso(input: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Outcome of re-checking a stored hash against a freshly computed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated_hash: Option<String>,
    pub reason: String,
}

impl VerificationReport {
    /// A failure with no hash comparison (e.g. record not found).
    pub fn failure(reason: impl Into<String>) -> Self {
        VerificationReport {
            valid: false,
            stored_hash: None,
            calculated_hash: None,
            reason: reason.into(),
        }
    }

    /// Compare a stored hash against a recomputed one.
    pub fn compare(stored: &str, calculated: &str) -> Self {
        let valid = stored == calculated;
        VerificationReport {
            valid,
            stored_hash: Some(stored.to_string()),
            calculated_hash: Some(calculated.to_string()),
            reason: if valid {
                "Hashes match".to_string()
            } else {
                "Hashes do not match".to_string()
            },
        }
    }
}
