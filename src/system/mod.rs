//! Execution system: every filesystem read, mutation and child process the
//! engine performs goes through the [`System`] trait.
//!
//! Behavior modes are decorators that wrap another system and can be stacked
//! in any order:
//!
//! - [`ReadOnlySystem`] rejects mutations with [`SystemError::ReadOnly`]
//! - [`DryRunSystem`] reports mutations as successful without performing them
//! - [`VerboseSystem`] writes a diff of each mutation before forwarding it
//! - [`DebugSystem`] logs every call and its outcome

mod debug;
mod dryrun;
pub mod glob;
mod readonly;
mod real;
mod verbose;

use std::path::{Path, PathBuf};

pub use debug::DebugSystem;
pub use dryrun::DryRunSystem;
pub use readonly::ReadOnlySystem;
pub use real::RealSystem;
pub use verbose::VerboseSystem;

use crate::error::SystemError;
use crate::exec::CommandSpec;

/// Type of a filesystem entry, as seen without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
    /// Anything else (socket, fifo, device).
    Other,
}

/// The subset of file metadata the engine relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// Entry type.
    pub file_type: FileType,
    /// Permission bits (`0o777` mask).
    pub perm: u32,
    /// Size in bytes.
    pub size: u64,
}

impl FileInfo {
    /// Return `true` for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }
}

/// A script to execute from a temporary file.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRun<'a> {
    /// Display name (target-relative path).
    pub name: &'a str,
    /// Working directory.
    pub dir: &'a Path,
    /// Script body.
    pub contents: &'a [u8],
    /// Interpreter to run the script with, or `None` to execute it directly.
    pub interpreter: Option<&'a CommandSpec>,
}

/// Filesystem and process access used by every engine component.
///
/// Implementations must be safe to share between the evaluator, template
/// functions and the apply engine.
pub trait System: Send + Sync + std::fmt::Debug {
    /// Read a whole file.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] on failure.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, SystemError>;

    /// List a directory's entry names in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] on failure.
    fn read_dir(&self, path: &Path) -> Result<Vec<String>, SystemError>;

    /// Read a symlink's target.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] on failure.
    fn read_link(&self, path: &Path) -> Result<PathBuf, SystemError>;

    /// Metadata without following symlinks.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] on failure.
    fn lstat(&self, path: &Path) -> Result<FileInfo, SystemError>;

    /// Metadata following symlinks.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] on failure.
    fn stat(&self, path: &Path) -> Result<FileInfo, SystemError>;

    /// Create or replace a file with exactly `perm` permissions.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] on failure or when mutations are rejected.
    fn write_file(&self, path: &Path, contents: &[u8], perm: u32) -> Result<(), SystemError>;

    /// Change permission bits.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] on failure or when mutations are rejected.
    fn chmod(&self, path: &Path, perm: u32) -> Result<(), SystemError>;

    /// Create a single directory with exactly `perm` permissions.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] on failure or when mutations are rejected.
    fn mkdir(&self, path: &Path, perm: u32) -> Result<(), SystemError>;

    /// Create a symlink at `link` pointing at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] on failure or when mutations are rejected.
    fn symlink(&self, target: &Path, link: &Path) -> Result<(), SystemError>;

    /// Remove a file, symlink or directory tree; absent paths are not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] on failure or when mutations are rejected.
    fn remove_all(&self, path: &Path) -> Result<(), SystemError>;

    /// Rename `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] on failure or when mutations are rejected.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), SystemError>;

    /// Run a command attached to the terminal.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] if the command fails or is rejected.
    fn run_foreground(&self, cmd: &CommandSpec) -> Result<(), SystemError>;

    /// Write a script to a temporary file and run it.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] if the script fails or is rejected.
    fn run_script(&self, script: &ScriptRun<'_>) -> Result<(), SystemError>;

    /// Run a command and capture its standard output.
    ///
    /// Not a mutation: decryption and modify scripts go through here.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] if the command fails.
    fn run_capture(&self, cmd: &CommandSpec, stdin: Option<&[u8]>)
    -> Result<Vec<u8>, SystemError>;

    /// Like [`run_capture`](Self::run_capture), but the result is cached per
    /// command line for the lifetime of the system.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] if the command fails.
    fn run_capture_idempotent(&self, cmd: &CommandSpec) -> Result<Vec<u8>, SystemError>;
}

/// Forward the non-mutating [`System`] methods to `self.inner`.
///
/// Used by decorators that only change how mutations behave.
macro_rules! forward_reads {
    () => {
        fn read_file(&self, path: &Path) -> Result<Vec<u8>, SystemError> {
            self.inner.read_file(path)
        }

        fn read_dir(&self, path: &Path) -> Result<Vec<String>, SystemError> {
            self.inner.read_dir(path)
        }

        fn read_link(&self, path: &Path) -> Result<PathBuf, SystemError> {
            self.inner.read_link(path)
        }

        fn lstat(&self, path: &Path) -> Result<FileInfo, SystemError> {
            self.inner.lstat(path)
        }

        fn stat(&self, path: &Path) -> Result<FileInfo, SystemError> {
            self.inner.stat(path)
        }

        fn run_capture(
            &self,
            cmd: &CommandSpec,
            stdin: Option<&[u8]>,
        ) -> Result<Vec<u8>, SystemError> {
            self.inner.run_capture(cmd, stdin)
        }

        fn run_capture_idempotent(&self, cmd: &CommandSpec) -> Result<Vec<u8>, SystemError> {
            self.inner.run_capture_idempotent(cmd)
        }
    };
}
pub(crate) use forward_reads;

/// `lstat` that maps "does not exist" to `None`.
///
/// # Errors
///
/// Returns any [`SystemError`] other than not-found.
pub fn lstat_opt(system: &dyn System, path: &Path) -> Result<Option<FileInfo>, SystemError> {
    match system.lstat(path) {
        Ok(info) => Ok(Some(info)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
