//! Decorator that logs every call.
use std::fmt::Display;
use std::path::{Path, PathBuf};

use super::{FileInfo, ScriptRun, System};
use crate::error::SystemError;
use crate::exec::CommandSpec;

/// Wraps a system and emits a `debug` event for every call and its outcome.
#[derive(Debug)]
pub struct DebugSystem {
    inner: Box<dyn System>,
}

impl DebugSystem {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Box<dyn System>) -> Self {
        Self { inner }
    }
}

fn traced<T>(
    op: &str,
    subject: &dyn Display,
    result: Result<T, SystemError>,
) -> Result<T, SystemError> {
    match &result {
        Ok(_) => tracing::debug!("{op} {subject}: ok"),
        Err(e) => tracing::debug!("{op} {subject}: {e}"),
    }
    result
}

impl System for DebugSystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, SystemError> {
        traced("read", &path.display(), self.inner.read_file(path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, SystemError> {
        traced("readdir", &path.display(), self.inner.read_dir(path))
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf, SystemError> {
        traced("readlink", &path.display(), self.inner.read_link(path))
    }

    fn lstat(&self, path: &Path) -> Result<FileInfo, SystemError> {
        traced("lstat", &path.display(), self.inner.lstat(path))
    }

    fn stat(&self, path: &Path) -> Result<FileInfo, SystemError> {
        traced("stat", &path.display(), self.inner.stat(path))
    }

    fn write_file(&self, path: &Path, contents: &[u8], perm: u32) -> Result<(), SystemError> {
        traced(
            &format!("write ({} bytes, {perm:o})", contents.len()),
            &path.display(),
            self.inner.write_file(path, contents, perm),
        )
    }

    fn chmod(&self, path: &Path, perm: u32) -> Result<(), SystemError> {
        traced(
            &format!("chmod {perm:o}"),
            &path.display(),
            self.inner.chmod(path, perm),
        )
    }

    fn mkdir(&self, path: &Path, perm: u32) -> Result<(), SystemError> {
        traced(
            &format!("mkdir {perm:o}"),
            &path.display(),
            self.inner.mkdir(path, perm),
        )
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<(), SystemError> {
        traced(
            &format!("symlink -> {}", target.display()),
            &link.display(),
            self.inner.symlink(target, link),
        )
    }

    fn remove_all(&self, path: &Path) -> Result<(), SystemError> {
        traced("remove", &path.display(), self.inner.remove_all(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), SystemError> {
        traced(
            &format!("rename to {}", to.display()),
            &from.display(),
            self.inner.rename(from, to),
        )
    }

    fn run_foreground(&self, cmd: &CommandSpec) -> Result<(), SystemError> {
        traced("run", cmd, self.inner.run_foreground(cmd))
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> Result<(), SystemError> {
        traced("script", &script.name, self.inner.run_script(script))
    }

    fn run_capture(
        &self,
        cmd: &CommandSpec,
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>, SystemError> {
        traced("capture", cmd, self.inner.run_capture(cmd, stdin))
    }

    fn run_capture_idempotent(&self, cmd: &CommandSpec) -> Result<Vec<u8>, SystemError> {
        traced("capture (cached)", cmd, self.inner.run_capture_idempotent(cmd))
    }
}
