//! Read-only commands: `cat`, `managed`, `unmanaged`, `source-path`,
//! `data`, `execute-template` and `git`.
use std::io::{Read as _, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use super::{Access, CommandSetup};
use crate::cli::{DataFormat, DataOpts, ExecuteTemplateOpts, GlobalOpts};
use crate::error::ApplyError;
use crate::exec::{self, CommandSpec};
use crate::logging::Logger;
use crate::source::{SourceState, join_target};
use crate::system::{FileType, System, lstat_opt};
use crate::target::TargetStateEntry;

/// Run the cat command.
///
/// # Errors
///
/// Returns an error if a target is not managed, is a directory, or cannot
/// be evaluated.
pub fn cat(global: &GlobalOpts, paths: &[PathBuf], log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let loaded = setup.load(log)?;
    let evaluator = setup.evaluator(&loaded);

    for target in setup.target_names(paths)? {
        let entry = loaded
            .source
            .get(&target)
            .ok_or_else(|| ApplyError::NotManaged(target.clone()))?;
        match evaluator.evaluate(&target, entry)?.as_ref() {
            TargetStateEntry::File { contents, .. }
            | TargetStateEntry::Create { contents, .. }
            | TargetStateEntry::Script { contents, .. } => out.write_all(contents)?,
            TargetStateEntry::Symlink { target: link } => writeln!(out, "{link}")?,
            TargetStateEntry::Dir { .. } => anyhow::bail!("{target}: is a directory"),
            TargetStateEntry::Remove => anyhow::bail!("{target}: is removed by the target state"),
        }
    }
    Ok(())
}

/// Run the managed command.
///
/// # Errors
///
/// Returns an error if the source tree cannot be read.
pub fn managed(global: &GlobalOpts, log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let loaded = setup.load(log)?;
    for (target, entry) in loaded.source.entries() {
        if global.include.includes(&global.exclude, entry) {
            writeln!(out, "{target}")?;
        }
    }
    Ok(())
}

/// Run the unmanaged command.
///
/// # Errors
///
/// Returns an error if the source tree or the destination cannot be read.
pub fn unmanaged(global: &GlobalOpts, log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let loaded = setup.load(log)?;
    for target in unmanaged_targets(
        setup.system.as_ref(),
        &loaded.source,
        &setup.dest_dir,
        &setup.source_dir,
    )? {
        writeln!(out, "{target}")?;
    }
    Ok(())
}

/// Destination paths that are neither managed nor ignored. Unmanaged
/// directories are listed without their contents; the source directory is
/// skipped when it lives inside the destination.
///
/// # Errors
///
/// Returns an error if a destination directory cannot be read.
pub fn unmanaged_targets(
    system: &dyn System,
    source: &SourceState,
    dest_dir: &Path,
    source_dir: &Path,
) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let mut pending = vec![String::new()];
    while let Some(dir) = pending.pop() {
        for name in system.read_dir(&dest_dir.join(&dir))? {
            let target = join_target(&dir, &name);
            let path = dest_dir.join(&target);
            if path == source_dir || source.is_ignored(&target) {
                continue;
            }
            if !source.contains(&target) {
                found.push(target);
            } else if lstat_opt(system, &path)?.is_some_and(|i| i.file_type == FileType::Dir) {
                pending.push(target);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Run the source-path command.
///
/// # Errors
///
/// Returns an error if a target is not managed.
pub fn source_path(global: &GlobalOpts, paths: &[PathBuf], log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    if paths.is_empty() {
        writeln!(out, "{}", setup.source_dir.display())?;
        return Ok(());
    }
    let loaded = setup.load(log)?;
    for target in setup.target_names(paths)? {
        writeln!(out, "{}", loaded.source.source_path(&target)?.display())?;
    }
    Ok(())
}

/// Run the data command.
///
/// # Errors
///
/// Returns an error if the data cannot be built or serialized.
pub fn data(global: &GlobalOpts, opts: &DataOpts, log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let loaded = setup.load(log)?;
    let data = loaded.engine.data();
    let text = match opts.format {
        DataFormat::Json => serde_json::to_string_pretty(data)? + "\n",
        DataFormat::Toml => toml::to_string_pretty(data).context("data cannot be written as TOML")?,
    };
    out.write_all(text.as_bytes())?;
    Ok(())
}

/// Run the execute-template command. Templates come from the arguments, or
/// stdin when there are none.
///
/// # Errors
///
/// Returns an error if a template fails to render.
pub fn execute_template(
    global: &GlobalOpts,
    opts: &ExecuteTemplateOpts,
    log: &Logger,
    out: &mut dyn Write,
) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let loaded = setup.load(log)?;
    if opts.templates.is_empty() {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading template from stdin")?;
        out.write_all(loaded.engine.render("stdin", &text, None)?.as_bytes())?;
        return Ok(());
    }
    for (i, text) in opts.templates.iter().enumerate() {
        let rendered = loaded.engine.render(&format!("arg{i}"), text, None)?;
        writeln!(out, "{rendered}")?;
    }
    Ok(())
}

/// Run git with `args` in the source directory.
///
/// # Errors
///
/// Returns an error if git cannot be started or exits non-zero.
pub fn git(global: &GlobalOpts, args: &[String], log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let spec = CommandSpec::new("git")
        .args(args.iter().cloned())
        .current_dir(&setup.source_dir);
    log.debug(&format!("running {spec}"));
    exec::run_inherited(&spec)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::fs;

    use super::*;
    use crate::source::{PlainMarkers, ReadOptions};
    use crate::system::RealSystem;

    #[test]
    fn unmanaged_lists_top_level_strays() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::create_dir_all(src.join("dot_config")).unwrap();
        fs::write(src.join("dot_config/app.toml"), "x").unwrap();
        fs::write(src.join(".dotstateignore"), ".cache\n").unwrap();
        fs::create_dir_all(dest.join(".config/other")).unwrap();
        fs::write(dest.join(".config/app.toml"), "x").unwrap();
        fs::write(dest.join(".config/other/f"), "x").unwrap();
        fs::write(dest.join(".profile"), "x").unwrap();
        fs::create_dir_all(dest.join(".cache")).unwrap();

        let system = RealSystem::new();
        let source = SourceState::read(&system, &src, &PlainMarkers, ReadOptions::default()).unwrap();
        let found = unmanaged_targets(&system, &source, &dest, &src).unwrap();
        assert_eq!(found, [".config/other", ".profile"]);
    }

    #[test]
    fn unmanaged_skips_source_inside_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join(".local/share/dotstate");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("dot_bashrc"), "x").unwrap();
        fs::write(dir.path().join(".bashrc"), "x").unwrap();

        let system = RealSystem::new();
        let source = SourceState::read(&system, &src, &PlainMarkers, ReadOptions::default()).unwrap();
        let found = unmanaged_targets(&system, &source, dir.path(), &src).unwrap();
        assert_eq!(found, [".local"]);
    }
}
