// SPDX-License-Identifier: MIT OR Apache-2.0
//! Best-effort structured JSON extraction under a decision contract.
//!
//! Assistant text rarely arrives as clean JSON. The extractor tries, in
//! order: fenced ```` ```json ```` blocks, then balanced-brace spans
//! (string escapes respected), validating each candidate against the
//! contract schema. The first valid candidate wins; anything less
//! degrades to `fallback` with the trimmed raw content standing in.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use arb_core::{DecisionContract, EmbedTextSource, ParseStatus};

/// Errors from contract preparation.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// The contract schema does not compile.
    #[error("contract '{name}' has an invalid schema: {reason}")]
    InvalidSchema {
        /// Contract name.
        name: String,
        /// Compiler message.
        reason: String,
    },
}

/// What extraction produced for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// How extraction went.
    pub parse_status: ParseStatus,
    /// Extracted decision, when the contract validated.
    pub outcome: Option<String>,
    /// Extracted rationale, possibly truncated.
    pub rationale: Option<String>,
    /// Whether the rationale was truncated.
    pub rationale_truncated: bool,
    /// Text destined for the embedding model.
    pub embed_text: String,
    /// Where the embed text came from.
    pub embed_text_source: EmbedTextSource,
}

/// A compiled decision contract, reusable across trials.
pub struct ContractExtractor {
    validator: jsonschema::Validator,
    embed_text_source: EmbedTextSource,
    rationale_max_chars: Option<usize>,
}

impl ContractExtractor {
    /// Compile a contract's schema once for the whole run.
    ///
    /// # Errors
    ///
    /// [`ContractError::InvalidSchema`] when the schema does not compile.
    pub fn new(contract: &DecisionContract) -> Result<Self, ContractError> {
        let validator = jsonschema::validator_for(&contract.schema).map_err(|err| {
            ContractError::InvalidSchema {
                name: contract.name.clone(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            validator,
            embed_text_source: contract.embed_text_source,
            rationale_max_chars: contract.rationale_max_chars,
        })
    }

    /// Extract a structured decision from assistant content.
    #[must_use]
    pub fn extract(&self, content: &str) -> Extraction {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Extraction {
                parse_status: ParseStatus::Failed,
                outcome: None,
                rationale: None,
                rationale_truncated: false,
                embed_text: String::new(),
                embed_text_source: EmbedTextSource::RawContent,
            };
        }

        for candidate in fenced_candidates(content).chain(brace_candidates(content)) {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&candidate) else {
                continue;
            };
            if self.validator.is_valid(&value) {
                return self.success(&value, trimmed);
            }
        }

        Extraction {
            parse_status: ParseStatus::Fallback,
            outcome: None,
            rationale: None,
            rationale_truncated: false,
            embed_text: trimmed.to_string(),
            embed_text_source: EmbedTextSource::RawContent,
        }
    }

    fn success(&self, value: &serde_json::Value, trimmed: &str) -> Extraction {
        let outcome = field_as_text(value, "decision");
        let mut rationale = value
            .get("rationale")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let mut rationale_truncated = false;
        if self.embed_text_source == EmbedTextSource::Rationale {
            if let (Some(cap), Some(r)) = (self.rationale_max_chars, rationale.as_mut()) {
                if r.chars().count() > cap {
                    *r = r.chars().take(cap).collect();
                    rationale_truncated = true;
                }
            }
        }

        let embed_text = match self.embed_text_source {
            EmbedTextSource::Decision => outcome.clone().unwrap_or_else(|| {
                // No decision field: the whole object stands in.
                arb_hash::canonical_stringify(value).unwrap_or_default()
            }),
            EmbedTextSource::Rationale => rationale.clone().unwrap_or_default(),
            EmbedTextSource::RawContent => trimmed.to_string(),
        };

        Extraction {
            parse_status: ParseStatus::Success,
            outcome,
            rationale,
            rationale_truncated,
            embed_text,
            embed_text_source: self.embed_text_source,
        }
    }
}

fn field_as_text(value: &serde_json::Value, field: &str) -> Option<String> {
    match value.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Contents of ```` ```json ```` fences, in document order.
fn fenced_candidates(content: &str) -> impl Iterator<Item = String> + '_ {
    let mut rest = content;
    std::iter::from_fn(move || {
        let open = rest.find("```json")?;
        let body_start = open + "```json".len();
        let body = &rest[body_start..];
        let close = body.find("```")?;
        let candidate = body[..close].trim().to_string();
        rest = &body[close + 3..];
        Some(candidate)
    })
}

/// Top-level balanced `{…}` spans, respecting string escapes.
fn brace_candidates(content: &str) -> impl Iterator<Item = String> + '_ {
    let bytes = content.char_indices().collect::<Vec<_>>();
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        while pos < bytes.len() {
            if bytes[pos].1 != '{' {
                pos += 1;
                continue;
            }
            let start = pos;
            let mut depth = 0u32;
            let mut in_string = false;
            let mut escaped = false;
            for i in start..bytes.len() {
                let c = bytes[i].1;
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        in_string = false;
                    }
                    continue;
                }
                match c {
                    '"' => in_string = true,
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            let span_start = bytes[start].0;
                            let span_end = bytes[i].0 + c.len_utf8();
                            pos = i + 1;
                            return Some(content[span_start..span_end].to_string());
                        }
                    }
                    _ => {}
                }
            }
            // Unbalanced to end of input: no candidate from here on.
            pos = bytes.len();
        }
        None
    })
}
