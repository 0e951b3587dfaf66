//! Subcommand orchestration.
//!
//! Every command starts from a [`CommandSetup`], which resolves directories,
//! loads the config file and builds the execution system stack for the
//! command's access level. Commands that need the source tree then call
//! [`CommandSetup::load`] and borrow an [`Evaluator`] and [`Planner`] from
//! the result.
pub mod add;
pub mod apply;
pub mod archive;
pub mod doctor;
pub mod inspect;
pub mod merge;
pub mod state;
pub mod version;

use std::io::{BufReader, IsTerminal as _, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde_json::{Map, Value};

use crate::apply::{ApplyOptions, LinePrompter, Planner, Prompter, TerminalPrompter};
use crate::cli::{Cli, Command, GlobalOpts};
use crate::config::{self, Config};
use crate::logging::Logger;
use crate::platform::Platform;
use crate::source::mutate::Crypto;
use crate::source::{ReadOptions, SourceState};
use crate::state::{StateMode, Tracker};
use crate::system::{
    DebugSystem, DryRunSystem, ReadOnlySystem, RealSystem, System, VerboseSystem, lstat_opt,
};
use crate::target::{EvalOptions, Evaluator};
use crate::template::{FuncContext, Secrets, TemplateContext, TemplateEngine, data};

/// Dispatch a parsed command line.
///
/// # Errors
///
/// Returns the command's error.
pub fn run(cli: &Cli, log: &Logger, out: &mut dyn Write) -> Result<()> {
    let global = &cli.global;
    match &cli.command {
        Command::Add(opts) => add::run(global, opts, log),
        Command::Apply(opts) => apply::run(global, opts, log),
        Command::Diff(opts) => apply::diff(global, opts, log),
        Command::Status(opts) => apply::status(global, opts, log, out),
        Command::Verify(opts) => apply::verify(global, opts, log),
        Command::Cat(opts) => inspect::cat(global, &opts.targets, log, out),
        Command::Chattr(opts) => add::chattr(global, opts, log),
        Command::Managed => inspect::managed(global, log, out),
        Command::Unmanaged => inspect::unmanaged(global, log, out),
        Command::Merge(opts) => merge::run(global, &opts.targets, log),
        Command::Archive(opts) => archive::run(global, opts, log, out),
        Command::Import(opts) => add::import(global, opts, log),
        Command::ExecuteTemplate(opts) => inspect::execute_template(global, opts, log, out),
        Command::Data(opts) => inspect::data(global, opts, log, out),
        Command::Doctor => doctor::run(global, log, out),
        Command::State(cmd) => state::run(global, cmd, log, out),
        Command::Git(opts) => inspect::git(global, &opts.args, log),
        Command::SourcePath(opts) => inspect::source_path(global, &opts.targets, log, out),
        Command::Completion(opts) => version::completion(opts.shell, out),
        Command::Version => version::run(out),
    }
}

/// How a command may touch the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Mutations are rejected.
    ReadOnly,
    /// Mutations go through, subject to `--dry-run` and `--verbose`.
    Write,
    /// Mutations are printed as a diff and never performed.
    Diff,
}

/// Shared state produced by the common command setup sequence.
#[derive(Debug)]
pub struct CommandSetup {
    /// Loaded config file.
    pub config: Config,
    /// Home directory.
    pub home: PathBuf,
    /// Config file path, which may not exist.
    pub config_file: PathBuf,
    /// Persistent state file.
    pub state_file: PathBuf,
    /// Source directory.
    pub source_dir: PathBuf,
    /// Destination directory.
    pub dest_dir: PathBuf,
    /// Colored output.
    pub color: bool,
    /// Execution system for this command's access level.
    pub system: Box<dyn System>,
    access: Access,
    global: GlobalOpts,
    overrides: Map<String, Value>,
}

/// The source tree and the template engine built from it.
#[derive(Debug)]
pub struct Loaded {
    /// Template inputs.
    pub context: TemplateContext,
    /// Source state.
    pub source: SourceState,
    /// Engine with the source tree's data and shared templates.
    pub engine: TemplateEngine,
}

impl Loaded {
    /// Fail if reading the source tree collected errors under keep-going.
    ///
    /// # Errors
    ///
    /// Returns an error counting the unreadable source entries.
    pub fn finish(&self) -> Result<()> {
        let count = self.source.errors().len();
        if count > 0 {
            anyhow::bail!("{count} source entr(ies) could not be read");
        }
        Ok(())
    }
}

impl CommandSetup {
    /// Resolve directories, load the config file and build the system stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory is unknown, the config file
    /// cannot be parsed, or `--override-data` is malformed.
    pub fn init(global: &GlobalOpts, access: Access, log: &Logger) -> Result<Self> {
        let home = config::home_dir()?;
        let config_file = match &global.config {
            Some(path) => absolute(path)?,
            None => config::config_dir(&home).join(config::CONFIG_FILE),
        };
        let config = Config::load(&config_file)?;
        log.debug(&format!("config: {}", config_file.display()));

        let source_dir = match &global.source {
            Some(path) => absolute(path)?,
            None => config.source_dir(&home),
        };
        let dest_dir = match &global.destination {
            Some(path) => absolute(path)?,
            None => config.dest_dir(&home),
        };
        let state_file = config_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(config::STATE_FILE);
        let color = global
            .color
            .unwrap_or(config.color)
            .resolve(crate::cli::auto_color());
        let overrides =
            data::parse_overrides(&global.override_data).map_err(|e| anyhow::anyhow!(e))?;
        let system = build_system(global, access, &dest_dir, color);
        log.debug(&format!("source: {}", source_dir.display()));
        log.debug(&format!("destination: {}", dest_dir.display()));

        Ok(Self {
            config,
            home,
            config_file,
            state_file,
            source_dir,
            dest_dir,
            color,
            system,
            access,
            global: global.clone(),
            overrides,
        })
    }

    /// Inputs for template engines.
    #[must_use]
    pub fn template_context(&self) -> TemplateContext {
        let platform = Platform::detect(&self.home);
        TemplateContext {
            funcs: FuncContext {
                system: template_system(self.global.debug),
                source_dir: self.source_dir.clone(),
                dest_dir: self.dest_dir.clone(),
                secrets: Arc::new(Secrets::new(self.config.secret.as_ref().map(config::Tool::spec))),
            },
            facts: data::facts(&platform, &self.source_dir, &self.dest_dir),
            config_data: self.config.data.clone(),
            overrides: self.overrides.clone(),
        }
    }

    /// Read the source tree and build its template engine.
    ///
    /// Under keep-going, unreadable entries are logged and left out; call
    /// [`Loaded::finish`] at the end of the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the source tree cannot be read, requires a newer
    /// version, or a shared template does not parse.
    pub fn load(&self, log: &Logger) -> Result<Loaded> {
        let context = self.template_context();
        let source = SourceState::read(
            self.system.as_ref(),
            &self.source_dir,
            &context,
            ReadOptions {
                keep_going: self.keep_going(),
            },
        )
        .with_context(|| format!("reading source state {}", self.source_dir.display()))?;
        match semver::Version::parse(crate::version().trim_start_matches('v')) {
            Ok(running) => source.check_version(&running, crate::is_dev_build())?,
            Err(_) => log.debug(&format!("skipping version check for {}", crate::version())),
        }
        for error in source.errors() {
            log.error(&error.to_string());
        }
        let engine = context.engine(source.source_data())?;
        Ok(Loaded {
            context,
            source,
            engine,
        })
    }

    /// Evaluator over a loaded source tree.
    #[must_use]
    pub fn evaluator<'a>(&'a self, loaded: &'a Loaded) -> Evaluator<'a> {
        Evaluator::new(
            &loaded.source,
            self.system.as_ref(),
            &loaded.engine,
            EvalOptions {
                dest_dir: self.dest_dir.clone(),
                umask: self.config.umask,
                decrypt: self.config.encryption.decrypt(),
                interpreters: self.config.interpreters(),
            },
        )
    }

    /// Planner over `evaluator` with the global flags applied.
    #[must_use]
    pub fn planner<'a>(&'a self, evaluator: &'a Evaluator<'a>) -> Planner<'a> {
        Planner::new(evaluator, self.system.as_ref(), self.apply_options())
    }

    /// Run settings from the global flags and config file.
    #[must_use]
    pub fn apply_options(&self) -> ApplyOptions {
        let diff = self.access == Access::Diff;
        let mut exclude = self.global.exclude.clone();
        if diff && !self.config.diff.exclude.is_empty() {
            match self.config.diff.exclude.parse() {
                Ok(extra) => exclude = exclude.union(&extra),
                Err(e) => tracing::warn!("diff.exclude: {e}"),
            }
        }
        ApplyOptions {
            force: self.global.force || diff,
            keep_going: self.keep_going(),
            recursive: self.global.recursive(),
            dry_run: self.global.dry_run || diff,
            color: self.color,
            include: self.global.include.clone(),
            exclude,
        }
    }

    fn keep_going(&self) -> bool {
        self.global.keep_going || self.config.keep_going
    }

    /// Encryption and decryption commands.
    #[must_use]
    pub fn crypto(&self) -> Crypto {
        Crypto {
            encrypt: self.config.encryption.encrypt(),
            decrypt: self.config.encryption.decrypt(),
        }
    }

    /// Open the persistent state. Writes stay in memory under `--dry-run`
    /// and for diff and read-only commands.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is locked or corrupt.
    pub fn open_tracker(&self) -> Result<Tracker> {
        let mode = match self.access {
            Access::Write if !self.global.dry_run => StateMode::ReadWrite,
            Access::Write | Access::Diff => StateMode::DryRun,
            Access::ReadOnly => StateMode::ReadOnly,
        };
        Tracker::open(&self.state_file, mode)
            .with_context(|| format!("opening state {}", self.state_file.display()))
    }

    /// Convert destination paths given on the command line to target names.
    ///
    /// # Errors
    ///
    /// Returns an error for a path outside the destination directory.
    pub fn target_names(&self, paths: &[PathBuf]) -> Result<Vec<String>> {
        paths
            .iter()
            .map(|path| {
                let abs = target_path(path)?;
                let rel = abs.strip_prefix(&self.dest_dir).map_err(|_| {
                    anyhow::anyhow!(
                        "{}: not in destination directory {}",
                        path.display(),
                        self.dest_dir.display()
                    )
                })?;
                let name = rel.to_string_lossy().replace('\\', "/");
                if name.is_empty() {
                    anyhow::bail!("{}: is the destination directory", path.display());
                }
                Ok(name)
            })
            .collect()
    }
}

fn build_system(global: &GlobalOpts, access: Access, dest_dir: &Path, color: bool) -> Box<dyn System> {
    let real: Box<dyn System> = Box::new(RealSystem::new());
    let mut system: Box<dyn System> = match access {
        Access::ReadOnly => Box::new(ReadOnlySystem::new(real)),
        Access::Diff => Box::new(VerboseSystem::new(
            Box::new(DryRunSystem::quiet(real)),
            Box::new(std::io::stdout()),
            dest_dir,
            color,
        )),
        Access::Write => {
            let inner: Box<dyn System> = match (global.dry_run, global.verbose) {
                (true, true) => Box::new(DryRunSystem::quiet(real)),
                (true, false) => Box::new(DryRunSystem::new(real)),
                (false, _) => real,
            };
            if global.verbose {
                Box::new(VerboseSystem::new(inner, Box::new(std::io::stdout()), dest_dir, color))
            } else {
                inner
            }
        }
    };
    if global.debug {
        system = Box::new(DebugSystem::new(system));
    }
    system
}

/// System handed to template functions: never writable, traced under
/// `--debug` like the main stack.
fn template_system(debug: bool) -> Arc<dyn System> {
    let system: Box<dyn System> = Box::new(ReadOnlySystem::new(Box::new(RealSystem::new())));
    if debug {
        Arc::new(DebugSystem::new(system))
    } else {
        Arc::from(system)
    }
}

/// Resolve `path` against the current directory without requiring it to
/// exist.
fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(canonical(&absolute_unresolved(path)?))
}

/// Like [`absolute`], but the final component is not resolved, so a
/// symlinked target keeps its own name.
fn target_path(path: &Path) -> Result<PathBuf> {
    let abs = absolute_unresolved(path)?;
    match (abs.parent(), abs.file_name()) {
        (Some(parent), Some(name)) => Ok(canonical(parent).join(name)),
        _ => Ok(canonical(&abs)),
    }
}

fn absolute_unresolved(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("reading current directory")?
        .join(path))
}

/// Canonicalize the longest existing ancestor of `path`.
fn canonical(path: &Path) -> PathBuf {
    if let Ok(resolved) = dunce::canonicalize(path) {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => canonical(parent).join(name),
        _ => path.to_path_buf(),
    }
}

/// Conflict prompter for the current stdin.
#[must_use]
pub fn prompter() -> Box<dyn Prompter> {
    if std::io::stdin().is_terminal() {
        Box::new(TerminalPrompter)
    } else {
        Box::new(LinePrompter::new(
            BufReader::new(std::io::stdin()),
            std::io::stderr(),
        ))
    }
}

/// Create `dir` and its missing ancestors through `system`.
///
/// # Errors
///
/// Returns an error if a directory cannot be created.
pub fn ensure_dir(system: &dyn System, dir: &Path, perm: u32) -> Result<()> {
    let mut missing = Vec::new();
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() || lstat_opt(system, ancestor)?.is_some() {
            break;
        }
        missing.push(ancestor);
    }
    for path in missing.into_iter().rev() {
        system.mkdir(path, perm)?;
    }
    Ok(())
}
