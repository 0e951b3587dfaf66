//! Decorator that reports mutations without performing them.
use std::path::{Path, PathBuf};

use super::{FileInfo, ScriptRun, System, forward_reads};
use crate::error::SystemError;
use crate::exec::CommandSpec;

/// Wraps a system and turns every mutating call into a successful no-op.
///
/// Each skipped mutation is logged on the `dotstate::dry_run` target unless
/// the decorator was built with [`DryRunSystem::quiet`].
#[derive(Debug)]
pub struct DryRunSystem {
    inner: Box<dyn System>,
    report: bool,
}

impl DryRunSystem {
    /// Wrap `inner`, logging each skipped mutation.
    #[must_use]
    pub fn new(inner: Box<dyn System>) -> Self {
        Self {
            inner,
            report: true,
        }
    }

    /// Wrap `inner` without logging.
    #[must_use]
    pub fn quiet(inner: Box<dyn System>) -> Self {
        Self {
            inner,
            report: false,
        }
    }

    fn skip(&self, action: &str) -> Result<(), SystemError> {
        if self.report {
            tracing::info!(target: "dotstate::dry_run", "would {action}");
        }
        Ok(())
    }
}

impl System for DryRunSystem {
    forward_reads!();

    fn write_file(&self, path: &Path, contents: &[u8], perm: u32) -> Result<(), SystemError> {
        self.skip(&format!(
            "write {} ({} bytes, mode {perm:o})",
            path.display(),
            contents.len()
        ))
    }

    fn chmod(&self, path: &Path, perm: u32) -> Result<(), SystemError> {
        self.skip(&format!("chmod {perm:o} {}", path.display()))
    }

    fn mkdir(&self, path: &Path, perm: u32) -> Result<(), SystemError> {
        self.skip(&format!("mkdir {} (mode {perm:o})", path.display()))
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<(), SystemError> {
        self.skip(&format!("link {} -> {}", link.display(), target.display()))
    }

    fn remove_all(&self, path: &Path) -> Result<(), SystemError> {
        self.skip(&format!("remove {}", path.display()))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), SystemError> {
        self.skip(&format!("rename {} to {}", from.display(), to.display()))
    }

    fn run_foreground(&self, cmd: &CommandSpec) -> Result<(), SystemError> {
        self.skip(&format!("run {cmd}"))
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> Result<(), SystemError> {
        self.skip(&format!("run script {}", script.name))
    }
}
