// SPDX-License-Identifier: MIT OR Apache-2.0
//! arb-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable record contract for Arbiter.
//!
//! Every type that lands in a run directory (plan entries, trial
//! records, parsed records, embedding records, convergence records, the
//! manifest) lives here, so that the writer, the verifier, and any
//! downstream reader agree on one schema.

/// Resolved configuration types.
pub mod config;
/// Per-batch convergence records.
pub mod convergence;
/// The run manifest and its artifact index.
pub mod manifest;
/// The frozen trial plan.
pub mod plan;
/// Trial, parsed, and embedding records.
pub mod record;
/// Run identifier helpers.
pub mod runid;
/// Out-of-band warnings.
pub mod warning;

pub use config::*;
pub use convergence::*;
pub use manifest::*;
pub use plan::*;
pub use record::*;
pub use runid::{new_run_id, normalize_run_suffix};
pub use warning::{RunWarning, WarningCode};

/// Schema version stamped into every manifest.
pub const SCHEMA_VERSION: &str = "1";

/// Harness version stamped into every manifest.
pub const ARBITER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hash algorithm identifier recorded in the manifest.
pub const HASH_ALGORITHM: &str = "sha256";
