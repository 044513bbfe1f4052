// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-trial protocol execution and batch scheduling.
//!
//! The executor turns one plan entry into a trial record, a parsed
//! record, and an embedding record; the scheduler runs a batch of those
//! with bounded concurrency and restores `trial_id` order afterwards,
//! which is the single point that makes concurrent execution
//! deterministic downstream.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod executor;
mod scheduler;

pub use executor::{ExecutorConfig, TrialExecutor, TrialOutcome};
pub use scheduler::run_batch;
