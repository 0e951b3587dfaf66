//! Commands: `apply`, `diff`, `status` and `verify`.
use std::io::Write;

use anyhow::Result;

use super::{Access, CommandSetup};
use crate::apply::Engine;
use crate::cli::{GlobalOpts, TargetsOpts};
use crate::error::ApplyError;
use crate::logging::Logger;

/// Run the apply command.
///
/// # Errors
///
/// Returns an error if the source tree cannot be read, the user quits at a
/// conflict, or any target fails.
pub fn run(global: &GlobalOpts, opts: &TargetsOpts, log: &Logger) -> Result<()> {
    let result = converge(global, opts, Access::Write, log);
    log.print_summary();
    result
}

/// Run the diff command: apply against a system that prints every change
/// instead of making it.
///
/// # Errors
///
/// Returns an error if the source tree cannot be read or a target cannot
/// be evaluated.
pub fn diff(global: &GlobalOpts, opts: &TargetsOpts, log: &Logger) -> Result<()> {
    converge(global, opts, Access::Diff, log)
}

fn converge(global: &GlobalOpts, opts: &TargetsOpts, access: Access, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, access, log)?;
    let loaded = setup.load(log)?;
    let targets = setup.target_names(&opts.targets)?;
    let evaluator = setup.evaluator(&loaded);
    let planner = setup.planner(&evaluator);

    if access == Access::Write {
        log.stage("Applying");
    }
    let mut tracker = setup.open_tracker()?;
    let mut prompter = super::prompter();
    let result = Engine::new(&planner, &mut tracker, prompter.as_mut(), log).apply(&targets);
    tracker.close()?;
    result?;
    loaded.finish()
}

/// Run the status command.
///
/// # Errors
///
/// Returns an error if the source tree or the state cannot be read.
pub fn status(global: &GlobalOpts, opts: &TargetsOpts, log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let loaded = setup.load(log)?;
    let targets = setup.target_names(&opts.targets)?;
    let evaluator = setup.evaluator(&loaded);
    let planner = setup.planner(&evaluator);
    let tracker = setup.open_tracker()?;

    for line in planner.status(&tracker, &targets)? {
        writeln!(out, "{line}")?;
    }
    loaded.finish()
}

/// Run the verify command.
///
/// # Errors
///
/// Returns [`ApplyError::VerifyMismatch`] if any destination differs from
/// its target state.
pub fn verify(global: &GlobalOpts, opts: &TargetsOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let loaded = setup.load(log)?;
    let targets = setup.target_names(&opts.targets)?;
    let evaluator = setup.evaluator(&loaded);
    let planner = setup.planner(&evaluator);

    let mismatched = planner.verify(&targets)?;
    for target in &mismatched {
        log.debug(&format!("{target}: differs from target state"));
    }
    if !mismatched.is_empty() {
        return Err(ApplyError::VerifyMismatch(mismatched.len()).into());
    }
    loaded.finish()
}
