// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run orchestrator.
//!
//! Owns the whole lifecycle: resolve → policy → plan → run directory →
//! batches → finalize. Clustering state and the prior-embedding list
//! are mutated only on this task; scheduler results hand ownership back
//! per batch, so no artifact ever depends on completion order.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod orchestrator;
mod signal;

pub use orchestrator::{RunError, RunOptions, RunOrchestrator, RunOutcome};
pub use signal::SignalGuard;
