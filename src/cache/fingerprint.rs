//! Fingerprint Module
//!
//! Derives cache keys from request content.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Rebuilds `value` with every object's keys in ascending order.
///
/// serde_json maps already iterate sorted unless its `preserve_order`
/// feature is enabled somewhere in the build.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON text of `value` with sorted object keys.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&canonicalize(&value))?)
}

/// Lowercase hex SHA-256 of the canonical JSON form of `value`.
///
/// Two values that differ only in map key order hash identically.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    let text = canonical_json(value)?;
    Ok(format!("{:x}", Sha256::digest(text.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&json!({"a": 1})).unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_known_digest() {
        // sha256 of the two bytes `{}`
        assert_eq!(
            fingerprint(&json!({})).unwrap(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"y": 1, "x": [ {"q": 1, "p": 2} ]}, "a": null});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":null,"b":{"x":[{"p":2,"q":1}],"y":1}}"#
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = fingerprint(&json!({"list": [1, 2]})).unwrap();
        let b = fingerprint(&json!({"list": [2, 1]})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let first: Value =
            serde_json::from_str(r#"{"stacks": {"B": {"update": true}, "A": {"create": true}}}"#)
                .unwrap();
        let second: Value =
            serde_json::from_str(r#"{"stacks": {"A": {"create": true}, "B": {"update": true}}}"#)
                .unwrap();
        assert_eq!(fingerprint(&first).unwrap(), fingerprint(&second).unwrap());
    }
}
