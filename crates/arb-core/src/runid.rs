// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run identifier helpers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Mint a run id for the given instant: `YYYYMMDDThhmmssZ_<6 hex>`.
///
/// The suffix comes from a v4 UUID and is already lowercase hex; it is
/// still passed through [`normalize_run_suffix`] so the format holds no
/// matter the entropy source.
#[must_use]
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%dT%H%M%SZ");
    let entropy = Uuid::new_v4().simple().to_string();
    format!("{stamp}_{}", normalize_run_suffix(&entropy))
}

/// Normalize a run-id suffix to exactly six lowercase hex characters.
///
/// Non-hex characters are stripped, the remainder is left-padded with
/// `0` to six characters and truncated to six.
///
/// # Examples
///
/// ```
/// assert_eq!(arb_core::normalize_run_suffix("AB12cd99"), "ab12cd");
/// assert_eq!(arb_core::normalize_run_suffix("xyz1"), "000001");
/// assert_eq!(arb_core::normalize_run_suffix(""), "000000");
/// ```
#[must_use]
pub fn normalize_run_suffix(raw: &str) -> String {
    let mut hex: String = raw
        .chars()
        .filter_map(|c| {
            let c = c.to_ascii_lowercase();
            c.is_ascii_hexdigit().then_some(c)
        })
        .collect();
    hex.truncate(6);
    format!("{hex:0>6}")
}
