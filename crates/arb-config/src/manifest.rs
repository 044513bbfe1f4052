// SPDX-License-Identifier: MIT OR Apache-2.0
//! The prompt manifest: content-addressed prompt assets.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The prompt manifest document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PromptManifest {
    /// Manifest entries.
    pub entries: Vec<PromptManifestEntry>,
}

/// One prompt asset.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PromptManifestEntry {
    /// Stable id referenced by sampling entries.
    pub id: String,
    /// What the asset is used as.
    pub kind: PromptKind,
    /// Path relative to the asset root.
    pub path: String,
    /// SHA-256 of the asset content.
    pub sha256: String,
}

/// Role a prompt asset plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// System-prompt persona.
    Persona,
    /// Question-framing protocol template.
    Protocol,
    /// Measurement instrument.
    Instrument,
}

impl PromptManifest {
    /// Look an entry up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PromptManifestEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}
