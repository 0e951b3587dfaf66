//! Command: write the target state as a tar archive.
use std::io::Write;

use anyhow::{Context as _, Result};
use flate2::Compression;
use flate2::write::GzEncoder;

use super::{Access, CommandSetup};
use crate::apply::Planner;
use crate::cli::{ArchiveOpts, GlobalOpts};
use crate::logging::Logger;
use crate::target::TargetStateEntry;

/// Run the archive command.
///
/// # Errors
///
/// Returns an error if a target cannot be evaluated or the archive cannot
/// be written.
pub fn run(global: &GlobalOpts, opts: &ArchiveOpts, log: &Logger, out: &mut dyn Write) -> Result<()> {
    let setup = CommandSetup::init(global, Access::ReadOnly, log)?;
    let loaded = setup.load(log)?;
    let targets = setup.target_names(&opts.targets)?;
    let evaluator = setup.evaluator(&loaded);
    let planner = setup.planner(&evaluator);

    let bytes = build(&planner, &targets, opts.gzip)?;
    match &opts.output {
        Some(path) => std::fs::write(path, &bytes)
            .with_context(|| format!("writing archive {}", path.display()))?,
        None => out.write_all(&bytes)?,
    }
    loaded.finish()
}

/// Tar archive of the target state of `requested` (everything when empty).
/// Scripts and removals have no file to archive and are left out.
///
/// # Errors
///
/// Returns an error if a target cannot be evaluated.
pub fn build(planner: &Planner<'_>, requested: &[String], gzip: bool) -> Result<Vec<u8>> {
    let mtime = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let mut builder = tar::Builder::new(Vec::new());

    for target in planner.targets(requested)? {
        let state = planner.target_state(&target)?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(mtime);
        match state.as_ref() {
            TargetStateEntry::Dir { perm, .. } => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(*perm);
                header.set_size(0);
                builder.append_data(&mut header, &target, std::io::empty())?;
            }
            TargetStateEntry::File { contents, perm } | TargetStateEntry::Create { contents, perm } => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*perm);
                header.set_size(contents.len() as u64);
                builder.append_data(&mut header, &target, contents.as_slice())?;
            }
            TargetStateEntry::Symlink { target: link } => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, &target, link)?;
            }
            TargetStateEntry::Script { .. } | TargetStateEntry::Remove => {}
        }
    }
    let tar = builder.into_inner()?;
    if !gzip {
        return Ok(tar);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Read as _;

    use serde_json::json;

    use super::*;
    use crate::apply::ApplyOptions;
    use crate::exec::CommandSpec;
    use crate::source::{PlainMarkers, ReadOptions, SourceState};
    use crate::system::RealSystem;
    use crate::target::{EvalOptions, Evaluator};

    fn members(bytes: &[u8]) -> Vec<(String, tar::EntryType, u32, String)> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                let kind = e.header().entry_type();
                let mode = e.header().mode().unwrap();
                let mut body = String::new();
                if kind == tar::EntryType::Symlink {
                    body = e.link_name().unwrap().unwrap().to_string_lossy().into_owned();
                } else {
                    e.read_to_string(&mut body).unwrap();
                }
                (path, kind, mode, body)
            })
            .collect()
    }

    #[test]
    fn archives_files_dirs_and_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::create_dir_all(src.join("private_dot_ssh")).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(src.join("private_dot_ssh/config.tmpl"), "Host {{ host }}\n").unwrap();
        fs::write(src.join("executable_dot_hook"), "#!/bin/sh\n").unwrap();
        fs::write(src.join("symlink_dot_vimrc"), ".config/nvim/init.vim\n").unwrap();
        fs::write(src.join("run_setup.sh"), "echo hi\n").unwrap();

        let system = RealSystem::new();
        let source = SourceState::read(&system, &src, &PlainMarkers, ReadOptions::default()).unwrap();
        let engine = crate::template::tests::context(json!({"host": "example"}))
            .engine(source.source_data())
            .unwrap();
        let evaluator = Evaluator::new(
            &source,
            &system,
            &engine,
            EvalOptions {
                dest_dir: dest,
                umask: 0o022,
                decrypt: CommandSpec::new("cat"),
                interpreters: BTreeMap::new(),
            },
        );
        let planner = Planner::new(&evaluator, &system, ApplyOptions::default());

        let bytes = build(&planner, &[], false).unwrap();
        let got = members(&bytes);
        assert_eq!(
            got,
            [
                (".hook".to_string(), tar::EntryType::Regular, 0o755, "#!/bin/sh\n".to_string()),
                (".ssh".to_string(), tar::EntryType::Directory, 0o700, String::new()),
                (".ssh/config".to_string(), tar::EntryType::Regular, 0o644, "Host example\n".to_string()),
                (".vimrc".to_string(), tar::EntryType::Symlink, 0o777, ".config/nvim/init.vim".to_string()),
            ]
        );

        let gz = build(&planner, &[".ssh/config".to_string()], true).unwrap();
        let mut plain = Vec::new();
        flate2::read::GzDecoder::new(gz.as_slice())
            .read_to_end(&mut plain)
            .unwrap();
        let names: Vec<String> = members(&plain).into_iter().map(|m| m.0).collect();
        assert_eq!(names, [".ssh", ".ssh/config"]);
    }
}
