// SPDX-License-Identifier: MIT OR Apache-2.0
//! The model catalog: the set of slugs the harness has vetted.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The model catalog document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ModelCatalog {
    /// Catalog entries.
    pub models: Vec<CatalogModel>,
}

/// One vetted model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CatalogModel {
    /// Canonical slug, `provider/name`.
    pub slug: String,
    /// Whether this is a free-tier model.
    #[serde(default)]
    pub free: bool,
    /// Alias slugs that resolve to this model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Context window, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u64>,
}

impl ModelCatalog {
    /// Whether the catalog knows `slug`, canonically or as an alias.
    #[must_use]
    pub fn knows(&self, slug: &str) -> bool {
        self.models
            .iter()
            .any(|m| m.slug == slug || m.aliases.iter().any(|a| a == slug))
    }

    /// Whether `slug` is a free-tier model.
    #[must_use]
    pub fn is_free(&self, slug: &str) -> bool {
        self.entry_for(slug).is_some_and(|m| m.free)
    }

    /// Whether `slug` is an alias rather than a canonical slug.
    #[must_use]
    pub fn is_alias(&self, slug: &str) -> bool {
        self.models
            .iter()
            .any(|m| m.slug != slug && m.aliases.iter().any(|a| a == slug))
    }

    /// The catalog entry serving `slug`, canonically or via alias.
    #[must_use]
    pub fn entry_for(&self, slug: &str) -> Option<&CatalogModel> {
        self.models
            .iter()
            .find(|m| m.slug == slug || m.aliases.iter().any(|a| a == slug))
    }
}
