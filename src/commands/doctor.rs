//! Command: check the environment for problems.
use std::fmt;
use std::io::Write;

use anyhow::Result;

use super::{Access, CommandSetup};
use crate::cli::GlobalOpts;
use crate::config::validation;
use crate::exec;
use crate::logging::Logger;
use crate::system::{FileType, System, lstat_opt};

/// Result level of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// Nothing to report.
    Ok,
    /// Informational.
    Info,
    /// Works, but something looks wrong.
    Warning,
    /// Broken.
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// One line of doctor output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Outcome.
    pub status: Status,
    /// What was checked.
    pub name: String,
    /// Detail.
    pub message: String,
}

impl Check {
    fn new(status: Status, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Run the doctor command.
///
/// # Errors
///
/// Returns an error if any check reports an error.
pub fn run(global: &GlobalOpts, log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let checks = checks(&setup, log);
    for check in &checks {
        writeln!(out, "{:<8}{:<24}{}", check.status, check.name, check.message)?;
    }
    let errors = checks.iter().filter(|c| c.status == Status::Error).count();
    if errors > 0 {
        anyhow::bail!("{errors} check(s) failed");
    }
    Ok(())
}

/// Run every check.
#[must_use]
pub fn checks(setup: &CommandSetup, log: &Logger) -> Vec<Check> {
    let system = setup.system.as_ref();
    let mut checks = vec![Check::new(
        Status::Ok,
        "version",
        if crate::is_dev_build() {
            format!("{} (development build)", crate::version())
        } else {
            crate::version().to_string()
        },
    )];

    checks.push(if setup.config_file.exists() {
        Check::new(Status::Ok, "config-file", setup.config_file.display().to_string())
    } else {
        Check::new(
            Status::Info,
            "config-file",
            format!("{} not found, using defaults", setup.config_file.display()),
        )
    });
    checks.push(dir_check(system, "source-dir", &setup.source_dir, Status::Error));
    checks.push(dir_check(system, "dest-dir", &setup.dest_dir, Status::Warning));

    match setup.load(log) {
        Ok(loaded) => {
            let errors = loaded.source.errors();
            checks.push(if errors.is_empty() {
                Check::new(
                    Status::Ok,
                    "source-state",
                    format!("{} entries", loaded.source.entries().count()),
                )
            } else {
                Check::new(
                    Status::Error,
                    "source-state",
                    format!("{} unreadable entr(ies)", errors.len()),
                )
            });
        }
        Err(e) => checks.push(Check::new(Status::Error, "source-state", format!("{e:#}"))),
    }

    checks.push(match setup.open_tracker() {
        Ok(_) => Check::new(Status::Ok, "state-file", setup.state_file.display().to_string()),
        Err(e) => Check::new(Status::Error, "state-file", format!("{e:#}")),
    });

    for warning in validation::validate(&setup.config) {
        checks.push(Check::new(
            Status::Warning,
            warning.item,
            format!("{}: {}", warning.source, warning.message),
        ));
    }

    checks.push(match exec::look_path("git") {
        Some(path) => Check::new(Status::Ok, "git", path.display().to_string()),
        None => Check::new(Status::Info, "git", "not found on PATH"),
    });
    checks
}

fn dir_check(system: &dyn System, name: &str, path: &std::path::Path, missing: Status) -> Check {
    match lstat_opt(system, path) {
        Ok(Some(info)) if info.file_type == FileType::Dir => {
            Check::new(Status::Ok, name, path.display().to_string())
        }
        Ok(Some(_)) => Check::new(
            Status::Error,
            name,
            format!("{} is not a directory", path.display()),
        ),
        Ok(None) => Check::new(missing, name, format!("{} does not exist", path.display())),
        Err(e) => Check::new(Status::Error, name, e.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use clap::Parser as _;

    use super::*;
    use crate::cli::Cli;

    fn setup(root: &std::path::Path) -> CommandSetup {
        let cli = Cli::parse_from([
            "dotstate",
            "-S",
            root.join("src").to_str().unwrap(),
            "-D",
            root.join("dest").to_str().unwrap(),
            "-c",
            root.join("dotstate.toml").to_str().unwrap(),
            "doctor",
        ]);
        CommandSetup::init(&cli.global, Access::ReadOnly, &Logger::new("test")).unwrap()
    }

    fn status_of<'a>(checks: &'a [Check], name: &str) -> &'a Check {
        checks.iter().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn missing_source_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dest")).unwrap();
        let checks = checks(&setup(dir.path()), &Logger::new("test"));
        assert_eq!(status_of(&checks, "source-dir").status, Status::Error);
        assert_eq!(status_of(&checks, "dest-dir").status, Status::Ok);
        assert_eq!(status_of(&checks, "config-file").status, Status::Info);
    }

    #[test]
    fn healthy_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("dest")).unwrap();
        std::fs::write(dir.path().join("src/dot_bashrc"), "x").unwrap();
        std::fs::write(dir.path().join("dotstate.toml"), "umask = 0o022\n").unwrap();
        let checks = checks(&setup(dir.path()), &Logger::new("test"));
        assert_eq!(status_of(&checks, "source-state").message, "1 entries");
        assert_eq!(status_of(&checks, "config-file").status, Status::Ok);
        assert_eq!(status_of(&checks, "state-file").status, Status::Ok);
    }

    #[test]
    fn bad_source_name_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("dest")).unwrap();
        std::fs::create_dir_all(dir.path().join("src/private_exact_dir")).unwrap();
        let checks = checks(&setup(dir.path()), &Logger::new("test"));
        assert_eq!(status_of(&checks, "source-state").status, Status::Error);
    }
}
