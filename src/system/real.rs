//! Execution system backed by the real filesystem and process table.
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{FileInfo, FileType, ScriptRun, System};
use crate::error::SystemError;
use crate::exec::{self, CommandSpec};

/// The system that actually touches disk.
#[derive(Debug, Default)]
pub struct RealSystem {
    idempotent: Mutex<HashMap<CommandSpec, Vec<u8>>>,
}

impl RealSystem {
    /// Create a new real system with an empty command cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn info_from(meta: &fs::Metadata) -> FileInfo {
    let ft = meta.file_type();
    let file_type = if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_dir() {
        FileType::Dir
    } else if ft.is_file() {
        FileType::File
    } else {
        FileType::Other
    };
    FileInfo {
        file_type,
        perm: perm_of(meta),
        size: meta.len(),
    }
}

/// Permission bits without setuid, setgid and sticky.
fn perm_of(meta: &fs::Metadata) -> u32 {
    mode_of(meta) & 0o777
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

#[cfg(unix)]
fn set_perm(path: &Path, perm: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(perm))
}

#[cfg(not(unix))]
fn set_perm(path: &Path, perm: u32) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(perm & 0o222 == 0);
    fs::set_permissions(path, perms)
}

impl System for RealSystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, SystemError> {
        fs::read(path).map_err(|e| SystemError::io("read", path, e))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, SystemError> {
        let mut names = fs::read_dir(path)
            .map_err(|e| SystemError::io("readdir", path, e))?
            .map(|entry| {
                entry
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .map_err(|e| SystemError::io("readdir", path, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        names.sort();
        Ok(names)
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf, SystemError> {
        fs::read_link(path).map_err(|e| SystemError::io("readlink", path, e))
    }

    fn lstat(&self, path: &Path) -> Result<FileInfo, SystemError> {
        fs::symlink_metadata(path)
            .map(|m| info_from(&m))
            .map_err(|e| SystemError::io("lstat", path, e))
    }

    fn stat(&self, path: &Path) -> Result<FileInfo, SystemError> {
        fs::metadata(path)
            .map(|m| info_from(&m))
            .map_err(|e| SystemError::io("stat", path, e))
    }

    fn write_file(&self, path: &Path, contents: &[u8], perm: u32) -> Result<(), SystemError> {
        with_writable_parent(path, || replace_file(path, contents, perm))
            .map_err(|e| SystemError::io("write", path, e))
    }

    fn chmod(&self, path: &Path, perm: u32) -> Result<(), SystemError> {
        set_perm(path, perm).map_err(|e| SystemError::io("chmod", path, e))
    }

    fn mkdir(&self, path: &Path, perm: u32) -> Result<(), SystemError> {
        let err = |e| SystemError::io("mkdir", path, e);
        with_writable_parent(path, || fs::create_dir(path)).map_err(err)?;
        set_perm(path, perm).map_err(err)
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<(), SystemError> {
        with_writable_parent(link, || {
            #[cfg(unix)]
            let result = std::os::unix::fs::symlink(target, link);
            #[cfg(windows)]
            let result = std::os::windows::fs::symlink_file(target, link);
            result
        })
        .map_err(|e| SystemError::io("symlink", link, e))
    }

    fn remove_all(&self, path: &Path) -> Result<(), SystemError> {
        let err = |e| SystemError::io("remove", path, e);
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(err(e)),
        };
        if meta.is_dir() {
            // read-only children would otherwise block removal
            make_tree_writable(path);
            with_writable_parent(path, || fs::remove_dir_all(path)).map_err(err)
        } else {
            with_writable_parent(path, || fs::remove_file(path)).map_err(err)
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), SystemError> {
        with_writable_parent(to, || fs::rename(from, to))
            .map_err(|e| SystemError::io("rename", from, e))
    }

    fn run_foreground(&self, cmd: &CommandSpec) -> Result<(), SystemError> {
        exec::run_inherited(cmd)
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> Result<(), SystemError> {
        let suffix = Path::new(script.name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let tmp_err = |e| SystemError::io("write", std::env::temp_dir(), e);
        let mut file = tempfile::Builder::new()
            .prefix("dotstate-script-")
            .suffix(&suffix)
            .tempfile()
            .map_err(tmp_err)?;
        file.write_all(script.contents).map_err(tmp_err)?;
        // close the handle so the kernel will exec the file
        let path = file.into_temp_path();
        set_perm(&path, 0o700).map_err(|e| SystemError::io("chmod", path.to_path_buf(), e))?;

        let program = path.display().to_string();
        let spec = match script.interpreter {
            Some(interp) => interp.clone().args([program]),
            None => CommandSpec::new(program),
        };
        exec::run_inherited(&spec.current_dir(script.dir)).map_err(|e| match e {
            SystemError::Command { code, output, .. } => SystemError::Command {
                command: script.name.to_string(),
                code,
                output,
            },
            other => other,
        })
    }

    fn run_capture(
        &self,
        cmd: &CommandSpec,
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>, SystemError> {
        exec::run_with_input(cmd, stdin).map(|r| r.stdout)
    }

    fn run_capture_idempotent(&self, cmd: &CommandSpec) -> Result<Vec<u8>, SystemError> {
        if let Ok(cache) = self.idempotent.lock()
            && let Some(hit) = cache.get(cmd)
        {
            return Ok(hit.clone());
        }
        let out = exec::run(cmd)?.stdout;
        if let Ok(mut cache) = self.idempotent.lock() {
            cache.insert(cmd.clone(), out.clone());
        }
        Ok(out)
    }
}

/// Write `contents` to a temporary file next to `path` with `perm` already
/// set, then rename it over `path`. The old file's mode does not matter and
/// the new one is never visible with looser permissions.
fn replace_file(path: &Path, contents: &[u8], perm: u32) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::Builder::new().prefix(".dotstate-").tempfile_in(dir)?;
    file.write_all(contents)?;
    set_perm(file.path(), perm)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Run `op` on an entry of `path`'s parent directory. If the parent denies
/// the owner write access, grant it for the duration of `op` and put the
/// old mode back afterwards.
fn with_writable_parent<T>(path: &Path, op: impl Fn() -> std::io::Result<T>) -> std::io::Result<T> {
    let denied = match op() {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => e,
        other => return other,
    };
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Err(denied);
    };
    let perm = match fs::metadata(parent) {
        Ok(meta) if meta.is_dir() && mode_of(&meta) & 0o200 == 0 => mode_of(&meta),
        _ => return Err(denied),
    };
    set_perm(parent, perm | 0o200)?;
    let result = op();
    let restored = set_perm(parent, perm);
    let value = result?;
    restored?;
    Ok(value)
}

#[cfg(unix)]
fn make_tree_writable(path: &Path) {
    if let Ok(meta) = fs::symlink_metadata(path)
        && meta.is_dir()
    {
        set_perm(path, mode_of(&meta) | 0o700).ok();
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_tree_writable(&entry.path());
            }
        }
    }
}

#[cfg(not(unix))]
fn make_tree_writable(_path: &Path) {}
