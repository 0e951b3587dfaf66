//! Commands that change the source tree: `add`, `chattr` and `import`.
use anyhow::{Context as _, Result};

use super::{Access, CommandSetup};
use crate::cli::{AddOpts, ChattrOpts, GlobalOpts, ImportOpts};
use crate::logging::{Logger, Outcome};
use crate::source::mutate::{AddOptions, AttrModifiers, ImportOptions, Mutator};

/// Permission bits for a source directory created by `add` or `import`.
const SOURCE_ROOT_PERM: u32 = 0o700;

/// Run the add command.
///
/// # Errors
///
/// Returns an error if a target is missing or cannot be written into the
/// source tree.
pub fn run(global: &GlobalOpts, opts: &AddOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, Access::Write, log)?;
    let loaded = setup.load(log)?;
    let targets = setup.target_names(&opts.targets)?;
    super::ensure_dir(setup.system.as_ref(), &setup.source_dir, SOURCE_ROOT_PERM)?;

    let crypto = setup.crypto();
    let mut mutator = Mutator::new(setup.system.as_ref(), &loaded.source, &setup.dest_dir, &crypto);
    let written = mutator.add(
        &targets,
        &AddOptions {
            template: opts.template,
            encrypt: opts.encrypt,
            create: opts.create,
            exact: opts.exact,
            recursive: global.recursive(),
        },
    )?;
    for path in &written {
        log.record(&path.display().to_string(), outcome(global), None);
    }
    log.info(&format!("added {} source entr(ies)", written.len()));
    Ok(())
}

/// Run the chattr command.
///
/// # Errors
///
/// Returns an error if the attributes do not parse, a target is not
/// managed, or a rename fails.
pub fn chattr(global: &GlobalOpts, opts: &ChattrOpts, log: &Logger) -> Result<()> {
    let modifiers: AttrModifiers = opts
        .attributes
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let setup = CommandSetup::init(global, Access::Write, log)?;
    let loaded = setup.load(log)?;
    let targets = setup.target_names(&opts.targets)?;

    let crypto = setup.crypto();
    let mut mutator = Mutator::new(setup.system.as_ref(), &loaded.source, &setup.dest_dir, &crypto);
    let renames = mutator.chattr(&modifiers, &targets)?;
    for (old, new) in &renames {
        log.info(&format!("{} -> {}", old.display(), new.display()));
    }
    if renames.is_empty() {
        log.info("no attributes changed");
    }
    Ok(())
}

/// Run the import command.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or unpacked.
pub fn import(global: &GlobalOpts, opts: &ImportOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, Access::Write, log)?;
    let loaded = setup.load(log)?;
    let dest = match &opts.into {
        Some(dir) => setup
            .target_names(std::slice::from_ref(dir))?
            .into_iter()
            .next()
            .unwrap_or_default(),
        None => String::new(),
    };
    let archive = std::fs::read(&opts.archive)
        .with_context(|| format!("reading archive {}", opts.archive.display()))?;
    super::ensure_dir(setup.system.as_ref(), &setup.source_dir, SOURCE_ROOT_PERM)?;

    let crypto = setup.crypto();
    let mut mutator = Mutator::new(setup.system.as_ref(), &loaded.source, &setup.dest_dir, &crypto);
    let written = mutator.import(
        &archive,
        &ImportOptions {
            dest,
            strip_components: opts.strip_components,
            exact: opts.exact,
        },
    )?;
    for path in &written {
        log.record(&path.display().to_string(), outcome(global), None);
    }
    log.info(&format!(
        "imported {} source entr(ies) from {}",
        written.len(),
        opts.archive.display()
    ));
    Ok(())
}

const fn outcome(global: &GlobalOpts) -> Outcome {
    if global.dry_run {
        Outcome::DryRun
    } else {
        Outcome::Applied
    }
}
