// SPDX-License-Identifier: MIT OR Apache-2.0
//! The embeddings provenance document.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How the embedding-of-record ended up stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceStatus {
    /// No embeddings were produced at all.
    NotGenerated,
    /// `embeddings.arrow` was written and is the primary format.
    ArrowGenerated,
    /// The Arrow build failed; the debug JSONL is the record.
    JsonlFallback,
}

/// `embeddings.provenance.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmbeddingsProvenance {
    /// How storage ended up.
    pub status: ProvenanceStatus,
    /// What the run intended to write.
    pub intended_primary_format: String,
    /// What is actually the embedding-of-record.
    pub actual_primary_format: String,
    /// Vector length, when any embedding exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    /// Rows in the primary artifact.
    pub row_count: u64,
    /// The Arrow failure, when demoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrow_error: Option<String>,
}

impl EmbeddingsProvenance {
    /// Provenance for a successful Arrow write.
    #[must_use]
    pub fn arrow(dimensions: u32, row_count: u64) -> Self {
        Self {
            status: ProvenanceStatus::ArrowGenerated,
            intended_primary_format: "arrow".into(),
            actual_primary_format: "arrow".into(),
            dimensions: Some(dimensions),
            row_count,
            arrow_error: None,
        }
    }

    /// Provenance after demoting to the JSONL fallback.
    #[must_use]
    pub fn fallback(dimensions: Option<u32>, row_count: u64, error: impl Into<String>) -> Self {
        Self {
            status: ProvenanceStatus::JsonlFallback,
            intended_primary_format: "arrow".into(),
            actual_primary_format: "jsonl".into(),
            dimensions,
            row_count,
            arrow_error: Some(error.into()),
        }
    }

    /// Provenance when no embedding was ever produced.
    #[must_use]
    pub fn not_generated() -> Self {
        Self {
            status: ProvenanceStatus::NotGenerated,
            intended_primary_format: "arrow".into(),
            actual_primary_format: "none".into(),
            dimensions: None,
            row_count: 0,
            arrow_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_string(&ProvenanceStatus::JsonlFallback).unwrap(),
            "\"jsonl_fallback\""
        );
        let p = EmbeddingsProvenance::fallback(Some(8), 5, "disk full");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["status"], "jsonl_fallback");
        assert_eq!(v["actual_primary_format"], "jsonl");
        assert_eq!(v["arrow_error"], "disk full");
    }

    #[test]
    fn arrow_constructor_has_no_error() {
        let v = serde_json::to_value(EmbeddingsProvenance::arrow(8, 10)).unwrap();
        assert!(v.get("arrow_error").is_none());
        assert_eq!(v["row_count"], 10);
    }
}
