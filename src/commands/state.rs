//! Command: inspect or delete the persistent state.
use std::io::Write;

use anyhow::{Context as _, Result};

use super::{Access, CommandSetup};
use crate::cli::{GlobalOpts, StateCommand};
use crate::logging::Logger;
use crate::state;

/// Run a `state` subcommand.
///
/// # Errors
///
/// Returns an error if the state file is locked, corrupt or cannot be
/// removed.
pub fn run(global: &GlobalOpts, cmd: &StateCommand, log: &Logger, out: &mut dyn Write) -> Result<()> {
    match cmd {
        StateCommand::Dump => dump(global, log, out),
        StateCommand::Reset => reset(global, log),
    }
}

fn dump(global: &GlobalOpts, log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let tracker = setup.open_tracker()?;
    let value = tracker.dump()?;
    writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
    Ok(())
}

fn reset(global: &GlobalOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, Access::Write, log)?;
    let path = &setup.state_file;
    if !global.force {
        let question = format!("delete {}?", path.display());
        if !super::prompter().confirm(&question)? {
            log.info("state left unchanged");
            return Ok(());
        }
    }
    if global.dry_run {
        log.dry_run(&format!("would delete {}", path.display()));
        return Ok(());
    }
    state::reset(path).with_context(|| format!("deleting {}", path.display()))?;
    log.info(&format!("deleted {}", path.display()));
    Ok(())
}
