//! Target state evaluation.
//!
//! Each source entry is turned into a [`TargetStateEntry`] by reading its
//! contents, decrypting, rendering templates and running modify scripts.
//! Results are computed on first use and memoized per target for the rest of
//! the run, errors included.
use std::collections::{BTreeMap, HashMap};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::attr::{FileAttr, ScriptOrder, SourceFileKind};
use crate::error::EvalError;
use crate::exec::CommandSpec;
use crate::source::{SourceEntry, SourceState};
use crate::state::EntryState;
use crate::system::{FileType, System, lstat_opt};
use crate::template::TemplateEngine;

/// The desired state of one destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStateEntry {
    /// A directory.
    Dir {
        /// Permission bits.
        perm: u32,
        /// Remove unmanaged children.
        exact: bool,
    },
    /// A file with fully managed contents.
    File {
        /// Contents.
        contents: Vec<u8>,
        /// Permission bits.
        perm: u32,
    },
    /// A file written only when missing.
    Create {
        /// Initial contents.
        contents: Vec<u8>,
        /// Permission bits.
        perm: u32,
    },
    /// A script run for its side effects.
    Script {
        /// Script body.
        contents: Vec<u8>,
        /// Run at most once per distinct contents.
        once: bool,
        /// Run order.
        order: ScriptOrder,
        /// Interpreter chosen by extension.
        interpreter: Option<CommandSpec>,
    },
    /// A symbolic link.
    Symlink {
        /// Link target.
        target: String,
    },
    /// The path must not exist.
    Remove,
}

impl TargetStateEntry {
    /// Persisted form of this state.
    #[must_use]
    pub fn entry_state(&self) -> EntryState {
        match self {
            Self::Dir { perm, .. } => EntryState::dir(*perm),
            Self::File { contents, perm } | Self::Create { contents, perm } => {
                EntryState::file(contents, *perm)
            }
            Self::Script { contents, .. } => EntryState::script(contents),
            Self::Symlink { target } => EntryState::symlink(target),
            Self::Remove => EntryState::remove(),
        }
    }

    /// Return `true` for scripts.
    #[must_use]
    pub const fn is_script(&self) -> bool {
        matches!(self, Self::Script { .. })
    }

    /// Return `true` if the script body is only whitespace.
    #[must_use]
    pub fn is_blank_script(&self) -> bool {
        matches!(self, Self::Script { contents, .. } if contents.iter().all(u8::is_ascii_whitespace))
    }
}

/// Settings the evaluator needs beyond the source tree.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Destination directory, read by modify scripts.
    pub dest_dir: PathBuf,
    /// Umask applied to computed permissions.
    pub umask: u32,
    /// Command that decrypts stdin to stdout.
    pub decrypt: CommandSpec,
    /// Script interpreters by file extension.
    pub interpreters: BTreeMap<String, CommandSpec>,
}

type Cached = Result<Arc<TargetStateEntry>, EvalError>;

/// Lazily computes and memoizes target states.
#[derive(Debug)]
pub struct Evaluator<'a> {
    source: &'a SourceState,
    system: &'a dyn System,
    engine: &'a TemplateEngine,
    options: EvalOptions,
    cache: Mutex<HashMap<String, Cached>>,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator over `source`.
    #[must_use]
    pub fn new(
        source: &'a SourceState,
        system: &'a dyn System,
        engine: &'a TemplateEngine,
        options: EvalOptions,
    ) -> Self {
        Self {
            source,
            system,
            engine,
            options,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The source state being evaluated.
    #[must_use]
    pub const fn source(&self) -> &'a SourceState {
        self.source
    }

    /// Evaluation settings.
    #[must_use]
    pub const fn options(&self) -> &EvalOptions {
        &self.options
    }

    /// Target state of the managed entry at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] if the entry cannot be read, decrypted, rendered
    /// or modified; the same error is returned on every later call.
    pub fn evaluate(&self, target: &str, entry: &SourceEntry) -> Result<Arc<TargetStateEntry>, EvalError> {
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(target).cloned()) {
            return hit;
        }
        let result = self.compute(target, entry).map(Arc::new);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(target.to_string(), result.clone());
        }
        result
    }

    /// Evaluated contents of a file, script or symlink entry, without kind
    /// specific handling. Used by `cat` and `merge`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] on read, decryption or template failures.
    pub fn contents(&self, target: &str, entry: &SourceEntry) -> Result<Vec<u8>, EvalError> {
        match entry {
            SourceEntry::File { source_rel, attr } => self.file_contents(target, source_rel, attr),
            SourceEntry::Dir { source_rel, .. } => Err(EvalError::Read {
                path: display(source_rel),
                message: "is a directory".to_string(),
            }),
        }
    }

    fn compute(&self, target: &str, entry: &SourceEntry) -> Result<TargetStateEntry, EvalError> {
        let (source_rel, attr) = match entry {
            SourceEntry::Dir { attr, .. } => {
                return Ok(TargetStateEntry::Dir {
                    perm: attr.perm(self.options.umask),
                    exact: attr.exact,
                });
            }
            SourceEntry::File { source_rel, attr } => (source_rel, attr),
        };
        if attr.kind == SourceFileKind::Remove {
            return Ok(TargetStateEntry::Remove);
        }
        let contents = self.file_contents(target, source_rel, attr)?;
        let perm = attr.perm(self.options.umask);
        Ok(match attr.kind {
            SourceFileKind::File if contents.is_empty() && !attr.empty => TargetStateEntry::Remove,
            SourceFileKind::File => TargetStateEntry::File { contents, perm },
            SourceFileKind::Create => TargetStateEntry::Create { contents, perm },
            SourceFileKind::Modify => self.modify(target, source_rel, &contents, perm)?,
            SourceFileKind::Script => TargetStateEntry::Script {
                contents,
                once: attr.once,
                order: attr.order,
                interpreter: self.interpreter(target).cloned(),
            },
            SourceFileKind::Symlink => TargetStateEntry::Symlink {
                target: String::from_utf8_lossy(&contents).trim().to_string(),
            },
            SourceFileKind::Remove => TargetStateEntry::Remove,
        })
    }

    fn file_contents(
        &self,
        target: &str,
        source_rel: &Path,
        attr: &FileAttr,
    ) -> Result<Vec<u8>, EvalError> {
        let name = display(source_rel);
        let mut contents = self
            .system
            .read_file(&self.source.root().join(source_rel))
            .map_err(|e| EvalError::Read {
                path: name.clone(),
                message: e.to_string(),
            })?;
        if attr.encrypted {
            contents = self
                .system
                .run_capture(&self.options.decrypt, Some(&contents))
                .map_err(|e| EvalError::Decrypt {
                    path: name.clone(),
                    message: e.to_string(),
                })?;
        }
        if attr.template {
            let text = String::from_utf8(contents).map_err(|_| EvalError::Template {
                path: name.clone(),
                message: "template is not valid UTF-8".to_string(),
            })?;
            contents = self
                .engine
                .render(&name, &text, Some((&name, target)))?
                .into_bytes();
        }
        Ok(contents)
    }

    fn interpreter(&self, target: &str) -> Option<&CommandSpec> {
        let ext = Path::new(target).extension()?.to_str()?;
        self.options.interpreters.get(ext)
    }

    /// Run a modify script with the current destination contents on stdin.
    fn modify(
        &self,
        target: &str,
        source_rel: &Path,
        script: &[u8],
        perm: u32,
    ) -> Result<TargetStateEntry, EvalError> {
        let fail = |message: String| EvalError::Modify {
            path: display(source_rel),
            message,
        };
        let dest = self.options.dest_dir.join(target);
        let current = match lstat_opt(self.system, &dest).map_err(|e| fail(e.to_string()))? {
            Some(info) if info.file_type == FileType::File => {
                Some(self.system.read_file(&dest).map_err(|e| fail(e.to_string()))?)
            }
            Some(_) => return Err(fail(format!("{target}: not a regular file"))),
            None => None,
        };

        let suffix = Path::new(target)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let mut file = tempfile::Builder::new()
            .prefix("dotstate-modify-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| fail(e.to_string()))?;
        file.write_all(script).map_err(|e| fail(e.to_string()))?;
        let path = file.into_temp_path();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| fail(e.to_string()))?;
        }
        let script_path = path.display().to_string();
        let cmd = match self.interpreter(target) {
            Some(interp) => interp.clone().args([script_path]),
            None => CommandSpec::new(script_path),
        };
        let output = self
            .system
            .run_capture(&cmd, Some(current.as_deref().unwrap_or_default()))
            .map_err(|e| fail(e.to_string()))?;

        if current.is_none() && output.is_empty() {
            return Ok(TargetStateEntry::Remove);
        }
        Ok(TargetStateEntry::File {
            contents: output,
            perm,
        })
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
