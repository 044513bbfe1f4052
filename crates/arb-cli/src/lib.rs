// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared pieces of the `arbiter` binary that are worth unit-testing.
#![deny(unsafe_code)]

mod color;

pub use color::{ColorMode, resolve_color, resolve_color_from_env};
