//! Child process helpers shared by the real execution system and template
//! functions.
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::SystemError;

/// A program invocation: program, arguments and optional working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory; inherits the current one when `None`.
    pub dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Create an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of a command execution.
#[derive(Debug)]
pub struct ExecResult {
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

impl ExecResult {
    /// Convert a non-zero exit into [`SystemError::Command`].
    fn checked(self, spec: &CommandSpec) -> Result<Self, SystemError> {
        if self.success {
            return Ok(self);
        }
        Err(SystemError::Command {
            command: spec.to_string(),
            code: self.code.unwrap_or(-1),
            output: self.stderr.trim().to_string(),
        })
    }
}

/// Run a command capturing its output. Fails if the command exits non-zero.
///
/// # Errors
///
/// Returns [`SystemError::Spawn`] if the process cannot start and
/// [`SystemError::Command`] if it exits unsuccessfully.
pub fn run(spec: &CommandSpec) -> Result<ExecResult, SystemError> {
    run_with_input(spec, None)
}

/// Run a command feeding `input` on stdin and capturing its output.
///
/// # Errors
///
/// Returns [`SystemError::Spawn`] if the process cannot start or stdin cannot
/// be written, and [`SystemError::Command`] if it exits unsuccessfully.
pub fn run_with_input(spec: &CommandSpec, input: Option<&[u8]>) -> Result<ExecResult, SystemError> {
    let spawn_err = |source| SystemError::Spawn {
        command: spec.to_string(),
        source,
    };
    let mut child = spec
        .command()
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;
    // stdin is fed from a second thread so a chatty child cannot deadlock
    // on a full stdout pipe
    let output = std::thread::scope(|scope| {
        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            scope.spawn(move || stdin.write_all(data).ok());
        }
        child.wait_with_output()
    })
    .map_err(spawn_err)?;
    ExecResult::from(output).checked(spec)
}

/// Run a command attached to the terminal. Fails if the command exits
/// non-zero.
///
/// # Errors
///
/// Returns [`SystemError::Spawn`] if the process cannot start and
/// [`SystemError::Command`] if it exits unsuccessfully.
pub fn run_inherited(spec: &CommandSpec) -> Result<(), SystemError> {
    let status = spec
        .command()
        .status()
        .map_err(|source| SystemError::Spawn {
            command: spec.to_string(),
            source,
        })?;
    if status.success() {
        return Ok(());
    }
    Err(SystemError::Command {
        command: spec.to_string(),
        code: status.code().unwrap_or(-1),
        output: String::new(),
    })
}

/// Resolve a program on `PATH`.
#[must_use]
pub fn look_path(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Check if a program is available on `PATH`.
#[must_use]
pub fn which(program: &str) -> bool {
    look_path(program).is_some()
}

/// Return `true` if `path` is an executable regular file.
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        path.metadata()
            .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
