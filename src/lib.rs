// SPDX-License-Identifier: MIT OR Apache-2.0
//! Umbrella crate for the Arbiter workspace.
//!
//! Re-exports every workspace crate under one name so integration tests
//! and downstream embedders can take a single dependency.
#![deny(unsafe_code)]

pub use arb_artifacts as artifacts;
pub use arb_cluster as cluster;
pub use arb_config as config;
pub use arb_contract as contract;
pub use arb_core as records;
pub use arb_events as events;
pub use arb_exec as exec;
pub use arb_hash as hash;
pub use arb_monitor as monitor;
pub use arb_plan as plan;
pub use arb_policy as policy;
pub use arb_provider as provider;
pub use arb_ratelimit as ratelimit;
pub use arb_runtime as runtime;
pub use arb_verify as verify;
