// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical serialization, provenance hashing, and seeded randomness.
//!
//! Everything that feeds a run's provenance hashes flows through this
//! crate: [`canonical_stringify`] is the *only* serialization used for
//! hashing, and [`rng_for`] is the *only* way the rest of the workspace
//! obtains randomness. Two runs with the same seed therefore agree on
//! every sampled value and every hash.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod rng;

pub use rng::{Mulberry32, SeededRng, fnv1a32, rng_for};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Errors from canonicalization.
#[derive(Debug, thiserror::Error)]
pub enum CanonError {
    /// JSON serialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce the canonical JSON string for any serializable value.
///
/// Canonical form: object keys sorted lexicographically (serde_json's
/// map is a `BTreeMap`, so round-tripping through [`serde_json::Value`]
/// sorts them), `None` fields omitted by the type's serde attributes,
/// arrays in order, and numbers in their shortest round-trippable
/// decimal rendering.
///
/// # Errors
///
/// Returns [`CanonError::Json`] if the value cannot be serialized.
///
/// # Examples
///
/// ```
/// let a = serde_json::json!({"b": 1, "a": [1.5, 2]});
/// let s = arb_hash::canonical_stringify(&a).unwrap();
/// assert_eq!(s, r#"{"a":[1.5,2],"b":1}"#);
/// ```
pub fn canonical_stringify<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash a serializable value through its canonical JSON form.
///
/// This is the single hashing contract used for run provenance
/// (`config_sha256`, `plan_sha256`, document hashes).
///
/// # Errors
///
/// Returns [`CanonError::Json`] if the value cannot be serialized.
pub fn canonical_sha256<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let json = canonical_stringify(value)?;
    Ok(sha256_hex(json.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn keys_are_sorted() {
        let v = serde_json::json!({"zeta": 1, "alpha": 2, "mid": {"y": 0, "x": 1}});
        let s = canonical_stringify(&v).unwrap();
        assert_eq!(s, r#"{"alpha":2,"mid":{"x":1,"y":0},"zeta":1}"#);
    }

    #[test]
    fn arrays_preserve_order() {
        let v = serde_json::json!([3, 1, 2]);
        assert_eq!(canonical_stringify(&v).unwrap(), "[3,1,2]");
    }

    #[test]
    fn none_fields_are_omitted() {
        #[derive(serde::Serialize)]
        struct S {
            a: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            b: Option<u32>,
        }
        let s = canonical_stringify(&S { a: 1, b: None }).unwrap();
        assert_eq!(s, r#"{"a":1}"#);
    }

    #[test]
    fn floats_use_shortest_roundtrip() {
        let v = serde_json::json!({"t": 0.1, "u": 1.0});
        let s = canonical_stringify(&v).unwrap();
        assert_eq!(s, r#"{"t":0.1,"u":1.0}"#);
    }

    #[test]
    fn sha256_hex_known_vector() {
        // sha256("") per FIPS 180-4.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn canonical_sha256_is_stable() {
        let v = serde_json::json!({"b": [1, 2], "a": "x"});
        assert_eq!(canonical_sha256(&v).unwrap(), canonical_sha256(&v).unwrap());
    }

    proptest! {
        #[test]
        fn stringify_parse_roundtrip(v in proptest_json()) {
            let s = canonical_stringify(&v).unwrap();
            let back: serde_json::Value = serde_json::from_str(&s).unwrap();
            prop_assert_eq!(back, v);
        }

        #[test]
        fn stringify_is_idempotent(v in proptest_json()) {
            let s1 = canonical_stringify(&v).unwrap();
            let reparsed: serde_json::Value = serde_json::from_str(&s1).unwrap();
            let s2 = canonical_stringify(&reparsed).unwrap();
            prop_assert_eq!(s1, s2);
        }
    }

    fn proptest_json() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            // Finite floats only; JSON has no NaN/Inf.
            (-1.0e9..1.0e9f64).prop_map(serde_json::Value::from),
            "[a-z]{0,8}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            ]
        })
    }
}
