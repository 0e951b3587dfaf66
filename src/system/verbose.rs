//! Decorator that prints a diff of every mutation before forwarding it.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{FileInfo, FileType, ScriptRun, System, forward_reads, lstat_opt};
use crate::diff::{self, DiffSide};
use crate::error::SystemError;
use crate::exec::CommandSpec;

/// Wraps a system and writes a git-style diff (or a shell-like description
/// for non-file mutations) to an output stream, then forwards the call.
pub struct VerboseSystem {
    inner: Box<dyn System>,
    out: Mutex<Box<dyn Write + Send>>,
    base: PathBuf,
    color: bool,
}

impl std::fmt::Debug for VerboseSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerboseSystem")
            .field("inner", &self.inner)
            .field("base", &self.base)
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

impl VerboseSystem {
    /// Wrap `inner`, printing paths relative to `base`.
    #[must_use]
    pub fn new(
        inner: Box<dyn System>,
        out: Box<dyn Write + Send>,
        base: impl Into<PathBuf>,
        color: bool,
    ) -> Self {
        Self {
            inner,
            out: Mutex::new(out),
            base: base.into(),
            color,
        }
    }

    fn rel(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.base).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }

    fn emit(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Ok(mut out) = self.out.lock() {
            out.write_all(text.as_bytes()).ok();
            out.flush().ok();
        }
    }

    /// Current contents and permissions of a regular file, if it is one.
    fn current_file(&self, path: &Path) -> Option<(Vec<u8>, u32)> {
        let info = lstat_opt(self.inner.as_ref(), path).ok()??;
        if info.file_type != FileType::File {
            return None;
        }
        let contents = self.inner.read_file(path).ok()?;
        Some((contents, info.perm))
    }
}

impl System for VerboseSystem {
    forward_reads!();

    fn write_file(&self, path: &Path, contents: &[u8], perm: u32) -> Result<(), SystemError> {
        let current = self.current_file(path);
        let old = current.as_ref().map(|(c, p)| DiffSide {
            contents: c,
            perm: *p,
        });
        self.emit(&diff::render(
            &self.rel(path),
            old,
            Some(DiffSide { contents, perm }),
            self.color,
        ));
        self.inner.write_file(path, contents, perm)
    }

    fn chmod(&self, path: &Path, perm: u32) -> Result<(), SystemError> {
        let old_perm = lstat_opt(self.inner.as_ref(), path)
            .ok()
            .flatten()
            .filter(|i| i.file_type == FileType::File)
            .map(|i| i.perm);
        match old_perm {
            Some(old) => self.emit(&diff::render(
                &self.rel(path),
                Some(DiffSide {
                    contents: &[],
                    perm: old,
                }),
                Some(DiffSide { contents: &[], perm }),
                self.color,
            )),
            None => self.emit(&format!("chmod {perm:o} {}\n", self.rel(path))),
        }
        self.inner.chmod(path, perm)
    }

    fn mkdir(&self, path: &Path, perm: u32) -> Result<(), SystemError> {
        self.emit(&format!("mkdir -m {perm:o} {}\n", self.rel(path)));
        self.inner.mkdir(path, perm)
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<(), SystemError> {
        self.emit(&format!(
            "ln -sf {} {}\n",
            target.display(),
            self.rel(link)
        ));
        self.inner.symlink(target, link)
    }

    fn remove_all(&self, path: &Path) -> Result<(), SystemError> {
        match self.current_file(path) {
            Some((contents, perm)) => self.emit(&diff::render(
                &self.rel(path),
                Some(DiffSide {
                    contents: &contents,
                    perm,
                }),
                None,
                self.color,
            )),
            None => {
                if lstat_opt(self.inner.as_ref(), path).ok().flatten().is_some() {
                    self.emit(&format!("rm -rf {}\n", self.rel(path)));
                }
            }
        }
        self.inner.remove_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), SystemError> {
        self.emit(&format!("mv {} {}\n", self.rel(from), self.rel(to)));
        self.inner.rename(from, to)
    }

    fn run_foreground(&self, cmd: &CommandSpec) -> Result<(), SystemError> {
        self.emit(&format!("$ {cmd}\n"));
        self.inner.run_foreground(cmd)
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> Result<(), SystemError> {
        self.emit(&diff::render(
            script.name,
            None,
            Some(DiffSide {
                contents: script.contents,
                perm: 0o755,
            }),
            self.color,
        ));
        self.inner.run_script(script)
    }
}
