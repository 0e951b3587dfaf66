//! Domain-specific error types for the dotstate engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Core modules return typed errors (e.g., [`AttrError`], [`EvalError`])
//! while command handlers at the CLI boundary convert them to [`anyhow::Error`]
//! via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! DotstateError
//! ├── Attr(AttrError)        — malformed source entry names
//! ├── Pattern(PatternError)  — invalid ignore/remove globs
//! ├── System(SystemError)    — filesystem, read-only rejection, child processes
//! ├── Eval(EvalError)        — read, decryption, template and modify failures
//! ├── State(StateError)      — persistent state store
//! ├── Source(SourceError)    — source tree walk
//! └── Apply(ApplyError)      — conflicts, keep-going, verify
//! ```

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the dotstate engine.
#[derive(Error, Debug)]
pub enum DotstateError {
    /// Source entry name could not be decoded.
    #[error("Encoding error: {0}")]
    Attr(#[from] AttrError),

    /// Ignore or remove pattern could not be parsed.
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// Execution system operation failed.
    #[error("System error: {0}")]
    System(#[from] SystemError),

    /// Target state evaluation failed.
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Persistent state store failure.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Source tree could not be read.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Apply run did not complete cleanly.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),
}

/// Errors produced while decoding a single source path segment.
///
/// Every variant names the offending segment so that the caller can report
/// it without extra context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttrError {
    /// Decoding left no target name (e.g. `dot_` or `private_`).
    #[error("{segment}: empty target name")]
    EmptyName {
        /// The raw source name.
        segment: String,
    },

    /// A known attribute prefix appeared in a position or on an entry kind
    /// where it is not allowed.
    #[error("{segment}: unexpected attribute prefix '{prefix}'")]
    UnexpectedPrefix {
        /// The raw source name.
        segment: String,
        /// The prefix that could not be consumed.
        prefix: String,
    },

    /// The entry name is not valid UTF-8; `segment` is its lossy form.
    #[error("{segment}: name is not valid UTF-8")]
    NonUtf8 {
        /// The raw source name with invalid bytes replaced.
        segment: String,
    },

    /// The decoded target name is not a valid single path component.
    #[error("{segment}: invalid target name '{name}'")]
    InvalidName {
        /// The raw source name.
        segment: String,
        /// The decoded name.
        name: String,
    },
}

/// Errors that arise from loading glob pattern files.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// A line of a pattern file is not a valid glob.
    #[error("{file}:{line}: invalid pattern '{pattern}': {message}")]
    Invalid {
        /// Source-relative path of the pattern file.
        file: String,
        /// One-based line number.
        line: usize,
        /// The offending pattern text.
        pattern: String,
        /// Message from the glob parser.
        message: String,
    },
}

/// Errors that arise from the execution system.
#[derive(Error, Debug)]
pub enum SystemError {
    /// An I/O operation failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        /// Operation name (`read`, `write`, `mkdir`, ...).
        op: &'static str,
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A mutating call reached a read-only system.
    #[error("{op} {}: not permitted on a read-only system", path.display())]
    ReadOnly {
        /// Operation name.
        op: &'static str,
        /// Path the operation targeted.
        path: PathBuf,
    },

    /// A child process could not be started.
    #[error("failed to execute {command}: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A child process exited unsuccessfully.
    #[error("{command} failed (exit {code}): {output}")]
    Command {
        /// Rendered command line.
        command: String,
        /// Exit code, `-1` when killed by a signal.
        code: i32,
        /// Captured combined output, trimmed.
        output: String,
    },
}

impl SystemError {
    /// Wrap an [`io::Error`] with the operation and path it came from.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Return `true` if this error means the path does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Errors that arise while computing the target state of one entry.
///
/// Messages are captured as strings so results can be memoized and cloned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Source contents could not be read.
    #[error("{path}: read: {message}")]
    Read {
        /// Source-relative path.
        path: String,
        /// Underlying error message.
        message: String,
    },

    /// Decryption command failed.
    #[error("{path}: decrypt: {message}")]
    Decrypt {
        /// Source-relative path.
        path: String,
        /// Underlying error message.
        message: String,
    },

    /// Template parsing or execution failed.
    #[error("{path}: template: {message}")]
    Template {
        /// Source-relative path or template name.
        path: String,
        /// Underlying error message.
        message: String,
    },

    /// A modify script failed.
    #[error("{path}: modify: {message}")]
    Modify {
        /// Source-relative path.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Errors that arise from the persistent state store.
#[derive(Error, Debug)]
pub enum StateError {
    /// Another process holds the read-write lock.
    #[error("{}: state is locked by another process", path.display())]
    Locked {
        /// Path of the state file.
        path: PathBuf,
    },

    /// Reading or writing the store failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The store or one of its values is not valid.
    #[error("{location}: invalid state data: {message}")]
    Corrupt {
        /// File path or `bucket/key`.
        location: String,
        /// Parser message.
        message: String,
    },

    /// A write reached a store opened read-only.
    #[error("state is opened read-only")]
    ReadOnly,

    /// The store was used after being closed.
    #[error("state has been closed")]
    Closed,
}

/// Errors that arise while reading the source tree.
#[derive(Error, Debug)]
pub enum SourceError {
    /// An entry name could not be decoded.
    #[error("{}: {source}", path.display())]
    Attr {
        /// Source-relative path of the entry.
        path: PathBuf,
        /// Decoding error.
        source: AttrError,
    },

    /// Two source entries decode to the same target path.
    #[error("{target}: duplicate source entries {} and {}", first.display(), second.display())]
    DuplicateTarget {
        /// Target-relative path.
        target: String,
        /// First source-relative path.
        first: PathBuf,
        /// Second source-relative path.
        second: PathBuf,
    },

    /// The source tree requires a newer version.
    #[error("source state requires version {required} or later, running {running}")]
    VersionTooOld {
        /// Minimum required version.
        required: semver::Version,
        /// Running version.
        running: semver::Version,
    },

    /// A version marker file could not be parsed.
    #[error("{}: invalid version: {message}", path.display())]
    InvalidVersion {
        /// Source-relative path of the marker.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A data file could not be parsed.
    #[error("{}: invalid data: {message}", path.display())]
    InvalidData {
        /// Source-relative path of the data file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Source tree contains something other than files and directories.
    #[error("{}: unsupported source entry type", path.display())]
    Unsupported {
        /// Source-relative path.
        path: PathBuf,
    },

    /// The requested target is not managed.
    #[error("{0}: not managed")]
    NotManaged(String),

    /// Pattern file failure.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Rendering a marker template failed.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Execution system failure.
    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors that arise from the apply engine.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// Sentinel raised to abandon one target without failing the run.
    ///
    /// Caught by the apply engine and never surfaced to the user.
    #[error("skipped")]
    Skip,

    /// The user chose to quit at a conflict prompt.
    #[error("aborted at user request")]
    Quit,

    /// A requested target is not in the source state.
    #[error("{0}: not managed")]
    NotManaged(String),

    /// The conflict prompt could not be shown or answered.
    #[error("prompt: {0}")]
    Prompt(String),

    /// One or more targets failed under keep-going.
    #[error("{0} target(s) failed")]
    Incomplete(usize),

    /// `verify` found targets that differ from the target state.
    #[error("{0} target(s) differ from the target state")]
    VerifyMismatch(usize),
}
