//! Command: three-way merge of destination, source and target state.
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use super::{Access, CommandSetup};
use crate::cli::GlobalOpts;
use crate::error::ApplyError;
use crate::exec::CommandSpec;
use crate::logging::Logger;
use crate::source::SourceEntry;

/// Run the merge command: for each target, open the merge tool on the
/// destination file, the source file and a temporary copy of the target
/// state.
///
/// # Errors
///
/// Returns an error if a target is not a managed file or the merge tool
/// fails.
pub fn run(global: &GlobalOpts, paths: &[PathBuf], log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, Access::Write, log)?;
    let loaded = setup.load(log)?;
    let evaluator = setup.evaluator(&loaded);
    let mut tracker = setup.open_tracker()?;

    for target in setup.target_names(paths)? {
        let entry = loaded
            .source
            .get(&target)
            .ok_or_else(|| ApplyError::NotManaged(target.clone()))?;
        if matches!(entry, SourceEntry::Dir { .. }) {
            anyhow::bail!("{target}: is a directory");
        }
        let contents = evaluator.contents(&target, entry)?;
        let mut target_copy = tempfile::Builder::new()
            .prefix("dotstate-merge-")
            .tempfile()
            .context("creating target state file")?;
        target_copy.write_all(&contents)?;
        target_copy.flush()?;

        let spec = merge_command(
            setup.config.merge.spec(),
            &setup.dest_dir.join(&target),
            &loaded.source.source_path(&target)?,
            target_copy.path(),
        );
        log.debug(&format!("running {spec}"));
        // the merge tool may invoke dotstate itself
        tracker.close()?;
        let result = setup.system.run_foreground(&spec);
        tracker.reopen()?;
        result.with_context(|| format!("merging {target}"))?;
    }
    tracker.close()?;
    Ok(())
}

fn merge_command(
    tool: CommandSpec,
    dest: &Path,
    source: &Path,
    target: &Path,
) -> CommandSpec {
    tool.args([
        dest.display().to_string(),
        source.display().to_string(),
        target.display().to_string(),
    ])
}
