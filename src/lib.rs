//! Declarative file-state manager.
//!
//! `dotstate` keeps a home directory in a desired state described by a
//! source directory. File names in the source tree encode attributes
//! (`dot_`, `private_`, `executable_`, `exact_`, `.tmpl`, ...), templates
//! are rendered with machine facts and user data, and scripts run alongside
//! file updates. A persistent state file remembers what was last written so
//! drifted destinations are detected before they are overwritten.
//!
//! The public API is organised in layers:
//!
//! - **[`source`]** and **[`attr`]**: read the source tree and decode names
//! - **[`target`]** and **[`template`]**: compute the target state of each entry
//! - **[`apply`]**: compare against the destination and converge it
//! - **[`system`]** and **[`state`]**: filesystem and persistent state access
//! - **[`commands`]**: top-level subcommand orchestration
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod apply;
pub mod attr;
pub mod cli;
pub mod commands;
pub mod config;
pub mod diff;
pub mod error;
pub mod exec;
pub mod logging;
pub mod pattern;
pub mod platform;
pub mod source;
pub mod state;
pub mod system;
pub mod target;
pub mod template;

/// Version string of this build.
#[must_use]
pub const fn version() -> &'static str {
    match option_env!("DOTSTATE_VERSION") {
        Some(version) => version,
        None => env!("CARGO_PKG_VERSION"),
    }
}

/// `true` when the build carries no release version.
#[must_use]
pub const fn is_dev_build() -> bool {
    option_env!("DOTSTATE_VERSION").is_none()
}
