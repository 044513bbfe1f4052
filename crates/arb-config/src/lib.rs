// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and resolution for Arbiter.
//!
//! The resolver takes four inputs (config path, model catalog path,
//! prompt manifest path, asset root) and produces a frozen
//! [`ResolvedConfig`](arb_core::ResolvedConfig) with prompt text inlined
//! and every referenced hash verified. Any schema violation, missing
//! asset, or hash mismatch fails resolution before a run directory is
//! ever created.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod manifest;
mod schema;

pub use catalog::{CatalogModel, ModelCatalog};
pub use manifest::{PromptKind, PromptManifest, PromptManifestEntry};
pub use schema::validate_document;

use arb_core::{CatalogStatus, PromptEntry, ResolvedConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors raised while resolving run inputs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A referenced file does not exist or could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A document is not valid JSON.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path that was requested.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A document failed schema validation (all violations joined).
    #[error("{document} failed schema validation:\n{}", reasons.join("\n"))]
    SchemaViolation {
        /// Which document failed.
        document: String,
        /// Individual violation messages.
        reasons: Vec<String>,
    },

    /// A sampling entry references an id missing from the prompt manifest.
    #[error("{kind} id '{id}' is not in the prompt manifest")]
    UnknownPromptId {
        /// Entry kind (persona / protocol / instrument).
        kind: String,
        /// The missing id.
        id: String,
    },

    /// An asset's content hash does not match the manifest.
    #[error("hash mismatch for '{id}' ({path}): manifest {expected}, actual {actual}")]
    HashMismatch {
        /// Manifest id.
        id: String,
        /// Asset path.
        path: String,
        /// Hash declared by the manifest.
        expected: String,
        /// Hash of the file on disk.
        actual: String,
    },

    /// Canonicalization failed.
    #[error(transparent)]
    Canon(#[from] arb_hash::CanonError),
}

/// Everything the orchestrator needs out of resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The frozen, fully-inlined configuration.
    pub config: ResolvedConfig,
    /// The parsed model catalog.
    pub catalog: ModelCatalog,
    /// Canonical hash of the catalog document.
    pub model_catalog_sha256: String,
    /// Canonical hash of the prompt manifest document.
    pub prompt_manifest_sha256: String,
}

/// Paths handed to the resolver.
#[derive(Debug, Clone)]
pub struct ResolverInputs {
    /// Run configuration document.
    pub config_path: PathBuf,
    /// Model catalog document.
    pub catalog_path: PathBuf,
    /// Prompt manifest document.
    pub prompt_manifest_path: PathBuf,
    /// Root for manifest-relative asset paths.
    pub asset_root: PathBuf,
}

/// Resolve run inputs into a frozen configuration.
///
/// Steps: load and schema-validate each document, inline prompt text
/// with hash verification, classify model slugs against the catalog,
/// re-validate the resolved document, and capture document hashes.
///
/// # Errors
///
/// Any missing file, malformed JSON, schema violation, unknown prompt
/// id, or hash mismatch aborts resolution.
pub fn resolve(inputs: &ResolverInputs) -> Result<Resolved, ConfigError> {
    let config_value = load_json(&inputs.config_path)?;
    validate_document::<ResolvedConfig>("config", &config_value)?;

    let catalog_value = load_json(&inputs.catalog_path)?;
    validate_document::<ModelCatalog>("model catalog", &catalog_value)?;

    let manifest_value = load_json(&inputs.prompt_manifest_path)?;
    validate_document::<PromptManifest>("prompt manifest", &manifest_value)?;

    let mut config: ResolvedConfig =
        serde_json::from_value(config_value).map_err(|source| ConfigError::Parse {
            path: inputs.config_path.display().to_string(),
            source,
        })?;
    let catalog: ModelCatalog =
        serde_json::from_value(catalog_value.clone()).map_err(|source| ConfigError::Parse {
            path: inputs.catalog_path.display().to_string(),
            source,
        })?;
    let prompt_manifest: PromptManifest =
        serde_json::from_value(manifest_value.clone()).map_err(|source| ConfigError::Parse {
            path: inputs.prompt_manifest_path.display().to_string(),
            source,
        })?;

    inline_entries(
        "persona",
        &mut config.sampling.personas,
        &prompt_manifest,
        &inputs.asset_root,
    )?;
    inline_entries(
        "protocol",
        &mut config.sampling.protocols,
        &prompt_manifest,
        &inputs.asset_root,
    )?;
    inline_entries(
        "instrument",
        &mut config.sampling.instruments,
        &prompt_manifest,
        &inputs.asset_root,
    )?;

    for model in &mut config.sampling.models {
        model.catalog_status = if catalog.knows(&model.slug) {
            CatalogStatus::Known
        } else {
            CatalogStatus::UnknownToCatalog
        };
    }

    // The inlined document must still satisfy the schema.
    let resolved_value = serde_json::to_value(&config).map_err(|source| ConfigError::Parse {
        path: inputs.config_path.display().to_string(),
        source,
    })?;
    validate_document::<ResolvedConfig>("resolved config", &resolved_value)?;

    let model_catalog_sha256 = arb_hash::canonical_sha256(&catalog_value)?;
    let prompt_manifest_sha256 = arb_hash::canonical_sha256(&manifest_value)?;
    debug!(
        catalog = %model_catalog_sha256,
        prompt_manifest = %prompt_manifest_sha256,
        "resolved run inputs"
    );

    Ok(Resolved {
        config,
        catalog,
        model_catalog_sha256,
        prompt_manifest_sha256,
    })
}

fn load_json(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn inline_entries(
    kind: &str,
    entries: &mut [PromptEntry],
    manifest: &PromptManifest,
    asset_root: &Path,
) -> Result<(), ConfigError> {
    for entry in entries {
        let manifest_entry =
            manifest
                .get(&entry.id)
                .ok_or_else(|| ConfigError::UnknownPromptId {
                    kind: kind.to_string(),
                    id: entry.id.clone(),
                })?;
        let path = asset_root.join(&manifest_entry.path);
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let actual = arb_hash::sha256_hex(text.as_bytes());
        if actual != manifest_entry.sha256 {
            return Err(ConfigError::HashMismatch {
                id: entry.id.clone(),
                path: manifest_entry.path.clone(),
                expected: manifest_entry.sha256.clone(),
                actual,
            });
        }
        entry.text = Some(text);
        entry.sha256 = Some(actual);
    }
    Ok(())
}
