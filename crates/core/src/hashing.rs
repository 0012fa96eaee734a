//! SHA-256 digests and content-addressed job fingerprints.
//!
//! A fingerprint is the hex digest of a job's semantic parameters in
//! canonical JSON form (object keys sorted at every depth), so the same
//! parameters always map to the same job id regardless of field order.
//! Two distinct parameter sets that collide would be merged into one job;
//! with SHA-256 that risk is accepted rather than handled.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length in characters of every fingerprint.
pub const FINGERPRINT_LEN: usize = 64;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Fingerprint any serializable parameter set.
///
/// Fails only if `params` cannot be represented as JSON (e.g. a map with
/// non-string keys).
pub fn fingerprint<T: Serialize + ?Sized>(params: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    Ok(fingerprint_value(&value))
}

/// Fingerprint an already-built JSON value.
pub fn fingerprint_value(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Serialize `value` with object keys sorted lexicographically at every
/// nesting level and no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(val, out);
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
        Value::String(s) => write_string(s, out),
        // Null, Bool, Number: serde_json's compact form is already canonical.
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Serializing a str into JSON cannot fail.
    out.push_str(&Value::String(s.to_owned()).to_string());
}
