// SPDX-License-Identifier: MIT OR Apache-2.0
//! Console color policy.
//!
//! Precedence: `NO_COLOR` disables, then `CLICOLOR_FORCE` enables,
//! then `CLICOLOR=0` disables, then the tty check decides.

/// Resolved color decision for stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Emit ANSI colors.
    Enabled,
    /// Plain text only.
    Disabled,
}

/// Resolve the color mode from environment values and a tty flag.
///
/// Callers pass the environment lookups in so the decision stays a
/// pure function.
#[must_use]
pub fn resolve_color(
    no_color: Option<&str>,
    clicolor_force: Option<&str>,
    clicolor: Option<&str>,
    stdout_is_tty: bool,
) -> ColorMode {
    if no_color.is_some_and(|v| !v.is_empty()) {
        return ColorMode::Disabled;
    }
    if clicolor_force.is_some_and(|v| !v.is_empty() && v != "0") {
        return ColorMode::Enabled;
    }
    if clicolor.is_some_and(|v| v == "0") {
        return ColorMode::Disabled;
    }
    if stdout_is_tty {
        ColorMode::Enabled
    } else {
        ColorMode::Disabled
    }
}

/// Resolve the color mode from the live process environment.
#[must_use]
pub fn resolve_color_from_env(stdout_is_tty: bool) -> ColorMode {
    let get = |key: &str| std::env::var(key).ok();
    resolve_color(
        get("NO_COLOR").as_deref(),
        get("CLICOLOR_FORCE").as_deref(),
        get("CLICOLOR").as_deref(),
        stdout_is_tty,
    )
}
