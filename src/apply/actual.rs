//! Current state of destination paths.
use std::path::Path;

use crate::error::SystemError;
use crate::state::EntryState;
use crate::system::{FileType, System, lstat_opt};

/// What is at a destination path right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActualState {
    /// Nothing.
    Absent,
    /// A directory.
    Dir {
        /// Permission bits.
        perm: u32,
    },
    /// A regular file.
    File {
        /// Contents.
        contents: Vec<u8>,
        /// Permission bits.
        perm: u32,
    },
    /// A symbolic link.
    Symlink {
        /// Link target.
        target: String,
    },
    /// A socket, fifo or device.
    Other,
}

impl ActualState {
    /// Read the state of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] if the path cannot be inspected.
    pub fn read(system: &dyn System, path: &Path) -> Result<Self, SystemError> {
        let Some(info) = lstat_opt(system, path)? else {
            return Ok(Self::Absent);
        };
        Ok(match info.file_type {
            FileType::Dir => Self::Dir { perm: info.perm },
            FileType::File => Self::File {
                contents: system.read_file(path)?,
                perm: info.perm,
            },
            FileType::Symlink => Self::Symlink {
                target: system.read_link(path)?.to_string_lossy().into_owned(),
            },
            FileType::Other => Self::Other,
        })
    }

    /// Return `true` if nothing exists at the path.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Contents and permissions of a regular file.
    #[must_use]
    pub fn file(&self) -> Option<(&[u8], u32)> {
        match self {
            Self::File { contents, perm } => Some((contents, *perm)),
            _ => None,
        }
    }

    /// Entry state describing this path, `None` when absent.
    #[must_use]
    pub fn entry_state(&self) -> Option<EntryState> {
        match self {
            Self::Absent => None,
            Self::Dir { perm } => Some(EntryState::dir(*perm)),
            Self::File { contents, perm } => Some(EntryState::file(contents, *perm)),
            Self::Symlink { target } => Some(EntryState::symlink(target)),
            Self::Other => Some(EntryState {
                mode: None,
                ..EntryState::file(&[], 0)
            }),
        }
    }
}
