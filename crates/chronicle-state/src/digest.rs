//! Canonical JSON encoding and content hashing for record payloads.
//!
//! The encoding is compact, object members are ordered by the UTF-16 code
//! units of their keys (RFC 8785 §3.2.3), and integer-valued floats are
//! written as integers. The content hash is the SHA-256 of that encoding.

use std::fmt::Write as _;

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::error::{StorageError, StorageResult};

fn write_number(out: &mut String, n: &Number) -> StorageResult<()> {
    if n.is_i64() || n.is_u64() {
        let _ = write!(out, "{n}");
        return Ok(());
    }
    match n.as_f64() {
        Some(f) if !f.is_finite() => Err(StorageError::NonCanonicalPayload(format!(
            "non-finite number {f}"
        ))),
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            let _ = write!(out, "{}", f as i64);
            Ok(())
        }
        _ => {
            let _ = write!(out, "{n}");
            Ok(())
        }
    }
}

fn write_canonical(out: &mut String, value: &Value) -> StorageResult<()> {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));
            out.push('{');
            for (i, (key, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(out, member)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item)?;
            }
            out.push(']');
        }
        Value::Number(n) => write_number(out, n)?,
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Compact canonical encoding of `value`.
pub fn canonical_json(value: &Value) -> StorageResult<String> {
    let mut out = String::new();
    write_canonical(&mut out, value)?;
    Ok(out)
}

/// SHA-256 hex digest of the canonical encoding.
pub fn payload_digest(value: &Value) -> StorageResult<String> {
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_order_invariant() {
        let a = serde_json::json!({ "b": 1, "a": { "z": true, "y": null } });
        let b = serde_json::json!({ "a": { "y": null, "z": true }, "b": 1 });
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(payload_digest(&a).unwrap(), payload_digest(&b).unwrap());
    }

    #[test]
    fn test_integer_valued_float_collapses() {
        let input = serde_json::json!({ "value": 2.0 });
        assert_eq!(canonical_json(&input).unwrap(), r#"{"value":2}"#);
    }

    #[test]
    fn test_array_order_preserved() {
        let a = serde_json::json!([3, 1, 2]);
        let b = serde_json::json!([1, 2, 3]);
        assert_ne!(payload_digest(&a).unwrap(), payload_digest(&b).unwrap());
    }

    #[test]
    fn test_string_payload_golden_digest() {
        let digest = payload_digest(&serde_json::json!("build passed")).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            digest,
            payload_digest(&serde_json::Value::String("build passed".into())).unwrap()
        );
    }

    #[test]
    fn test_keys_ordered_by_utf16_units() {
        // U+FF61 sorts after U+1F600 in UTF-16 (surrogates are 0xD83D..).
        let input = serde_json::json!({ "\u{FF61}": 1, "\u{1F600}": 2 });
        assert_eq!(
            canonical_json(&input).unwrap(),
            "{\"\u{1F600}\":2,\"\u{FF61}\":1}"
        );
    }
}
