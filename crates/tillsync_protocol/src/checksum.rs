//! Canonical payload serialization and checksums.
//!
//! A journal entry's checksum must verify identically no matter which process
//! wrote it or which serde_json map implementation a build links, so the
//! digest is taken over an explicit canonical form: JSON with object keys
//! sorted recursively and no insignificant whitespace.

use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

use tillsync_model::FieldMap;

/// Serializes a JSON value canonically: object keys sorted recursively,
/// minimal separators.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // String serialization of a key cannot fail.
                if let Ok(encoded) = serde_json::to_string(key) {
                    out.push_str(&encoded);
                }
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        }
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
        other => {
            if let Ok(encoded) = serde_json::to_string(other) {
                out.push_str(&encoded);
            }
        }
    }
}

/// Computes the SHA-256 hex digest of a payload's canonical serialization.
#[must_use]
pub fn payload_checksum(payload: &FieldMap) -> String {
    let canonical = canonical_json(&Value::Object(payload.clone()));
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
