// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-Schema validation of input documents.
//!
//! Schemas are derived from the Rust contract types with `schemars`, so
//! the validator and the deserializer can never disagree about shape.

use crate::ConfigError;
use schemars::JsonSchema;

/// Validate `value` against the schema derived for `T`.
///
/// All violations are collected and reported together, not just the
/// first.
///
/// # Errors
///
/// [`ConfigError::SchemaViolation`] with every violation message.
pub fn validate_document<T: JsonSchema>(
    document: &str,
    value: &serde_json::Value,
) -> Result<(), ConfigError> {
    let schema = schemars::schema_for!(T);
    let schema_value =
        serde_json::to_value(&schema).expect("schemars output is always valid JSON");
    let validator = jsonschema::validator_for(&schema_value)
        .expect("derived schemas are always compilable");
    let reasons: Vec<String> = validator
        .iter_errors(value)
        .map(|err| format!("{}: {err}", err.instance_path))
        .collect();
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::SchemaViolation {
            document: document.to_string(),
            reasons,
        })
    }
}
