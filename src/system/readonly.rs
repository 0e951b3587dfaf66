//! Decorator that rejects every mutation.
use std::path::{Path, PathBuf};

use super::{FileInfo, ScriptRun, System, forward_reads};
use crate::error::SystemError;
use crate::exec::CommandSpec;

/// Wraps a system and fails every mutating call with
/// [`SystemError::ReadOnly`].
#[derive(Debug)]
pub struct ReadOnlySystem {
    inner: Box<dyn System>,
}

impl ReadOnlySystem {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Box<dyn System>) -> Self {
        Self { inner }
    }
}

fn reject(op: &'static str, path: &Path) -> Result<(), SystemError> {
    Err(SystemError::ReadOnly {
        op,
        path: path.to_path_buf(),
    })
}

impl System for ReadOnlySystem {
    forward_reads!();

    fn write_file(&self, path: &Path, _contents: &[u8], _perm: u32) -> Result<(), SystemError> {
        reject("write", path)
    }

    fn chmod(&self, path: &Path, _perm: u32) -> Result<(), SystemError> {
        reject("chmod", path)
    }

    fn mkdir(&self, path: &Path, _perm: u32) -> Result<(), SystemError> {
        reject("mkdir", path)
    }

    fn symlink(&self, _target: &Path, link: &Path) -> Result<(), SystemError> {
        reject("symlink", link)
    }

    fn remove_all(&self, path: &Path) -> Result<(), SystemError> {
        reject("remove", path)
    }

    fn rename(&self, from: &Path, _to: &Path) -> Result<(), SystemError> {
        reject("rename", from)
    }

    fn run_foreground(&self, cmd: &CommandSpec) -> Result<(), SystemError> {
        reject("run", Path::new(&cmd.program))
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> Result<(), SystemError> {
        reject("run", Path::new(script.name))
    }
}
