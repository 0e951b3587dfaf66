//! The apply engine: converges destination paths on their target state.
//!
//! A run resolves the requested targets, orders them, then for each one
//! compares the last written, actual and target states. Changed targets are
//! written through the execution system, so the same code serves `apply`,
//! `diff` (dry-run plus verbose) and `status`.
//!
//! Targets run in this order:
//!
//! 1. `before_` scripts by rank, then path
//! 2. removals, deepest path first
//! 3. everything else by path, with plain scripts interleaved
//! 4. `after_` scripts by rank, then path
mod actual;
mod conflict;
mod status;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use actual::ActualState;
pub use conflict::{Choice, LinePrompter, Prompter, TerminalPrompter};
#[cfg(test)]
pub use conflict::MockPrompter;
pub use status::{StatusLine, letter};

use crate::attr::{ScriptPhase, SourceFileKind};
use crate::diff::{self, DiffSide};
use crate::error::{ApplyError, DotstateError, EvalError, SystemError};
use crate::exec::CommandSpec;
use crate::logging::{Log, Outcome};
use crate::source::{EntryType, EntryTypeSet, SourceEntry, join_target};
use crate::state::{EntryState, Tracker, equivalent};
use crate::system::{FileType, ScriptRun, System, lstat_opt};
use crate::target::{Evaluator, TargetStateEntry};

/// Settings for one run.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Overwrite changed destinations without prompting.
    pub force: bool,
    /// Continue past per-target failures.
    pub keep_going: bool,
    /// Expand requested directories to everything below them.
    pub recursive: bool,
    /// The system only pretends to mutate; outcomes are reported as dry-run.
    pub dry_run: bool,
    /// Colorize conflict diffs.
    pub color: bool,
    /// Entry types to act on.
    pub include: EntryTypeSet,
    /// Entry types to leave alone.
    pub exclude: EntryTypeSet,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            force: false,
            keep_going: false,
            recursive: false,
            dry_run: false,
            color: false,
            include: EntryTypeSet::all(),
            exclude: EntryTypeSet::none(),
        }
    }
}

/// Read-only half of the engine: target resolution, ordering and
/// inspection. Shared by `apply`, `status` and `verify`.
#[derive(Debug)]
pub struct Planner<'a> {
    evaluator: &'a Evaluator<'a>,
    system: &'a dyn System,
    options: ApplyOptions,
}

impl<'a> Planner<'a> {
    /// Plan over `evaluator`, reading the destination through `system`.
    #[must_use]
    pub const fn new(evaluator: &'a Evaluator<'a>, system: &'a dyn System, options: ApplyOptions) -> Self {
        Self {
            evaluator,
            system,
            options,
        }
    }

    /// Run settings.
    #[must_use]
    pub const fn options(&self) -> &ApplyOptions {
        &self.options
    }

    fn dest_dir(&self) -> &Path {
        &self.evaluator.options().dest_dir
    }

    /// Resolve `requested` target paths (every managed target when empty)
    /// into the set this run acts on.
    ///
    /// Managed ancestors of a requested target are included so that parents
    /// exist before their children. Destination paths matched by remove
    /// patterns are included alongside the managed entries.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::NotManaged`] for a path that is neither managed
    /// nor matched by a remove pattern.
    pub fn targets(&self, requested: &[String]) -> Result<Vec<String>, DotstateError> {
        let source = self.evaluator.source();
        let removals = source.remove_targets(self.system, self.dest_dir())?;
        let mut selected = BTreeSet::new();

        if requested.is_empty() {
            selected.extend(source.entries().map(|(t, _)| t.to_string()));
            selected.extend(removals);
        } else {
            for raw in requested {
                let target = raw.trim_end_matches('/');
                if source.contains(target) {
                    let mut ancestor = target;
                    while let Some((parent, _)) = ancestor.rsplit_once('/') {
                        if source.contains(parent) {
                            selected.insert(parent.to_string());
                        }
                        ancestor = parent;
                    }
                    selected.insert(target.to_string());
                    if self.options.recursive {
                        selected.extend(source.descendants(target).map(String::from));
                        let prefix = format!("{target}/");
                        selected.extend(removals.iter().filter(|r| r.starts_with(&prefix)).cloned());
                    }
                } else if removals.iter().any(|r| r == target) {
                    selected.insert(target.to_string());
                } else {
                    return Err(ApplyError::NotManaged(target.to_string()).into());
                }
            }
        }

        Ok(selected
            .into_iter()
            .filter(|t| self.is_included(t))
            .collect())
    }

    fn is_included(&self, target: &str) -> bool {
        match self.evaluator.source().get(target) {
            Some(entry) => self.options.include.includes(&self.options.exclude, entry),
            None => {
                self.options.include.contains(EntryType::Remove)
                    && !self.options.exclude.contains(EntryType::Remove)
            }
        }
    }

    /// Order `targets` for mutation.
    #[must_use]
    pub fn order(&self, targets: &[String]) -> Vec<String> {
        let source = self.evaluator.source();
        let mut before = Vec::new();
        let mut removals = Vec::new();
        let mut main = Vec::new();
        let mut after = Vec::new();

        for target in targets {
            match source.get(target) {
                Some(SourceEntry::File { attr, .. }) if attr.kind == SourceFileKind::Script => {
                    match attr.order.phase {
                        ScriptPhase::Before => before.push((attr.order.sort_key(), target.clone())),
                        ScriptPhase::After => after.push((attr.order.sort_key(), target.clone())),
                        ScriptPhase::During => main.push(target.clone()),
                    }
                }
                Some(SourceEntry::File { attr, .. }) if attr.kind == SourceFileKind::Remove => {
                    removals.push(target.clone());
                }
                Some(_) => main.push(target.clone()),
                None => removals.push(target.clone()),
            }
        }

        before.sort();
        after.sort();
        removals.sort();
        removals.reverse();
        main.sort();

        before
            .into_iter()
            .map(|(_, t)| t)
            .chain(removals)
            .chain(main)
            .chain(after.into_iter().map(|(_, t)| t))
            .collect()
    }

    /// Target state for `target`; unmanaged targets must be absent.
    ///
    /// # Errors
    ///
    /// Returns the memoized [`EvalError`] of the entry.
    pub fn target_state(&self, target: &str) -> Result<Arc<TargetStateEntry>, EvalError> {
        match self.evaluator.source().get(target) {
            Some(entry) => self.evaluator.evaluate(target, entry),
            None => Ok(Arc::new(TargetStateEntry::Remove)),
        }
    }

    fn actual(&self, target: &str) -> Result<ActualState, SystemError> {
        ActualState::read(self.system, &self.dest_dir().join(target))
    }

    /// Entry state the destination should end up with, given what is there.
    fn desired(target_state: &TargetStateEntry, actual: &ActualState) -> EntryState {
        match (target_state, actual) {
            (TargetStateEntry::Create { perm, .. }, ActualState::File { contents, .. }) => {
                EntryState::file(contents, *perm)
            }
            _ => target_state.entry_state(),
        }
    }

    fn script_would_run(
        tracker: &Tracker,
        target: &str,
        target_state: &TargetStateEntry,
    ) -> Result<bool, DotstateError> {
        match target_state {
            TargetStateEntry::Script { contents, once, .. } => Ok(!target_state.is_blank_script()
                && !(*once && tracker.script_has_run(target, contents)?)),
            _ => Ok(false),
        }
    }

    /// Two-column status of each target that is not clean.
    ///
    /// The first column compares the last written state with the actual
    /// state, the second the actual state with the target state. Scripts
    /// that would run show `R` in the second column.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation, system or state failure.
    pub fn status(&self, tracker: &Tracker, requested: &[String]) -> Result<Vec<StatusLine>, DotstateError> {
        let mut lines = Vec::new();
        for target in self.targets(requested)? {
            let target_state = self.target_state(&target)?;
            let line = if target_state.is_script() {
                StatusLine {
                    first: ' ',
                    second: if Self::script_would_run(tracker, &target, &target_state)? {
                        'R'
                    } else {
                        ' '
                    },
                    target,
                }
            } else {
                let actual = self.actual(&target)?;
                let actual_state = actual.entry_state();
                let last = tracker.entry_state(&target)?;
                let desired = Self::desired(&target_state, &actual);
                StatusLine {
                    first: letter(last.as_ref().or(actual_state.as_ref()), actual_state.as_ref()),
                    second: letter(actual_state.as_ref(), Some(&desired)),
                    target,
                }
            };
            if !line.is_clean() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Targets whose destination does not match the target state.
    /// Scripts are not checked.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation or system failure.
    pub fn verify(&self, requested: &[String]) -> Result<Vec<String>, DotstateError> {
        let mut mismatched = Vec::new();
        for target in self.targets(requested)? {
            let target_state = self.target_state(&target)?;
            if target_state.is_script() {
                continue;
            }
            let actual = self.actual(&target)?;
            let desired = Self::desired(&target_state, &actual);
            if !equivalent(actual.entry_state().as_ref(), Some(&desired)) {
                mismatched.push(target);
            }
        }
        Ok(mismatched)
    }
}

/// Mutating half of the engine.
pub struct Engine<'a> {
    planner: &'a Planner<'a>,
    tracker: &'a mut Tracker,
    prompter: &'a mut dyn Prompter,
    log: &'a dyn Log,
    overwrite_all: bool,
    created: BTreeSet<PathBuf>,
}

impl std::fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("planner", &self.planner)
            .field("tracker", &self.tracker)
            .field("prompter", &"<dyn Prompter>")
            .field("log", &"<dyn Log>")
            .field("overwrite_all", &self.overwrite_all)
            .field("created", &self.created)
            .finish()
    }
}

impl<'a> Engine<'a> {
    /// Create an engine recording into `tracker`.
    pub fn new(
        planner: &'a Planner<'a>,
        tracker: &'a mut Tracker,
        prompter: &'a mut dyn Prompter,
        log: &'a dyn Log,
    ) -> Self {
        Self {
            planner,
            tracker,
            prompter,
            log,
            overwrite_all: false,
            created: BTreeSet::new(),
        }
    }

    fn options(&self) -> &ApplyOptions {
        self.planner.options()
    }

    fn system(&self) -> &'a dyn System {
        self.planner.system
    }

    fn changed(&self) -> Outcome {
        if self.options().dry_run {
            Outcome::DryRun
        } else {
            Outcome::Applied
        }
    }

    /// Converge `requested` (every managed target when empty).
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Quit`] if the user quits at a prompt,
    /// [`ApplyError::Incomplete`] if targets failed under keep-going, or the
    /// first failure otherwise.
    pub fn apply(&mut self, requested: &[String]) -> Result<(), DotstateError> {
        let targets = self.planner.targets(requested)?;
        let ordered = self.planner.order(&targets);
        let mut failures = 0;

        for target in &ordered {
            match self.apply_target(target) {
                Ok(outcome) => self.log.record(target, outcome, None),
                Err(DotstateError::Apply(ApplyError::Skip)) => {
                    self.log.record(target, Outcome::Skipped, Some("conflict"));
                }
                Err(e @ DotstateError::Apply(ApplyError::Quit)) => return Err(e),
                Err(e) if self.options().keep_going => {
                    self.log.error(&format!("{target}: {e}"));
                    self.log.record(target, Outcome::Failed, Some(&e.to_string()));
                    failures += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if failures > 0 {
            return Err(ApplyError::Incomplete(failures).into());
        }
        Ok(())
    }

    fn apply_target(&mut self, target: &str) -> Result<Outcome, DotstateError> {
        let target_state = self.planner.target_state(target)?;
        if let TargetStateEntry::Script {
            contents,
            once,
            interpreter,
            ..
        } = &*target_state
        {
            return self.run_script(target, &target_state, contents, *once, interpreter.as_ref());
        }

        let path = self.planner.dest_dir().join(target);
        let actual = self.planner.actual(target)?;
        let actual_state = actual.entry_state();
        let desired = Planner::desired(&target_state, &actual);
        let last = self.tracker.entry_state(target)?;

        let mut outcome = Outcome::Unchanged;
        if !equivalent(actual_state.as_ref(), Some(&desired)) {
            if let Some(last) = &last
                && !equivalent(Some(last), actual_state.as_ref())
            {
                self.resolve_conflict(target, &actual, &target_state)?;
            }
            self.converge(&path, &actual, &target_state)?;
            outcome = self.changed();
        }

        if let TargetStateEntry::Dir { exact: true, .. } = &*target_state
            && self.remove_unmanaged_children(target, &path)?
        {
            outcome = self.changed();
        }

        if !last.as_ref().is_some_and(|l| *l == desired) {
            self.tracker.set_entry_state(target, &desired)?;
        }
        Ok(outcome)
    }

    fn resolve_conflict(
        &mut self,
        target: &str,
        actual: &ActualState,
        target_state: &TargetStateEntry,
    ) -> Result<(), DotstateError> {
        if self.options().force || self.overwrite_all {
            return Ok(());
        }
        let text = diff::render(
            target,
            actual_side(actual),
            target_side(target_state),
            self.options().color,
        );
        let choice = self
            .prompter
            .conflict(target, &text)
            .map_err(|e| ApplyError::Prompt(format!("{e:#}")))?;
        match choice {
            Choice::Overwrite => Ok(()),
            Choice::OverwriteAll => {
                self.overwrite_all = true;
                Ok(())
            }
            Choice::Skip => Err(ApplyError::Skip.into()),
            Choice::Quit => Err(ApplyError::Quit.into()),
        }
    }

    /// Make `path` match `target_state`.
    fn converge(
        &mut self,
        path: &Path,
        actual: &ActualState,
        target_state: &TargetStateEntry,
    ) -> Result<(), SystemError> {
        let system = self.system();
        match (target_state, actual) {
            (TargetStateEntry::Remove, ActualState::Absent) => Ok(()),
            (TargetStateEntry::Remove, _) => system.remove_all(path),

            (TargetStateEntry::Dir { perm, .. }, ActualState::Dir { .. }) => system.chmod(path, *perm),
            (TargetStateEntry::Dir { perm, .. }, _) => {
                self.clear(path, actual)?;
                system.mkdir(path, *perm)?;
                self.created.insert(path.to_path_buf());
                Ok(())
            }

            (TargetStateEntry::File { contents, perm }, ActualState::File { contents: current, .. })
                if current == contents =>
            {
                system.chmod(path, *perm)
            }
            (TargetStateEntry::Create { perm, .. }, ActualState::File { .. }) => system.chmod(path, *perm),
            (
                TargetStateEntry::File { contents, perm } | TargetStateEntry::Create { contents, perm },
                _,
            ) => {
                if !matches!(actual, ActualState::File { .. }) {
                    self.clear(path, actual)?;
                }
                system.write_file(path, contents, *perm)
            }

            (TargetStateEntry::Symlink { target }, _) => {
                self.clear(path, actual)?;
                system.symlink(Path::new(target), path)
            }

            (TargetStateEntry::Script { .. }, _) => Ok(()),
        }
    }

    /// Remove whatever is at `path` and make sure its parent exists.
    fn clear(&mut self, path: &Path, actual: &ActualState) -> Result<(), SystemError> {
        if !actual.is_absent() {
            self.system().remove_all(path)?;
        }
        self.ensure_parent(path)
    }

    /// Create missing ancestors of `path` below the destination directory.
    /// Directories made earlier in this run count as present even when the
    /// system only pretended to create them.
    fn ensure_parent(&mut self, path: &Path) -> Result<(), SystemError> {
        let planner = self.planner;
        let dest = planner.dest_dir();
        let mut missing: Vec<PathBuf> = Vec::new();
        let mut dir = path.parent();
        while let Some(d) = dir {
            if !d.starts_with(dest)
                || d == dest
                || self.created.contains(d)
                || lstat_opt(self.system(), d)?.is_some()
            {
                break;
            }
            missing.push(d.to_path_buf());
            dir = d.parent();
        }
        let perm = 0o777 & !planner.evaluator.options().umask;
        for d in missing.into_iter().rev() {
            self.system().mkdir(&d, perm)?;
            self.created.insert(d);
        }
        Ok(())
    }

    /// Delete children of an exact directory that are neither managed nor
    /// ignored. Returns `true` if anything was removed.
    fn remove_unmanaged_children(&mut self, target: &str, path: &Path) -> Result<bool, DotstateError> {
        match lstat_opt(self.system(), path)? {
            Some(info) if info.file_type == FileType::Dir => {}
            _ => return Ok(false),
        }
        let source = self.planner.evaluator.source();
        let mut removed = false;
        for name in self.system().read_dir(path)? {
            let child = join_target(target, &name);
            if source.contains(&child) || source.is_ignored(&child) {
                continue;
            }
            self.log.debug(&format!("removing unmanaged {child}"));
            self.system().remove_all(&path.join(&name))?;
            self.tracker.delete_entry_subtree(&child)?;
            removed = true;
        }
        Ok(removed)
    }

    fn run_script(
        &mut self,
        target: &str,
        target_state: &TargetStateEntry,
        contents: &[u8],
        once: bool,
        interpreter: Option<&CommandSpec>,
    ) -> Result<Outcome, DotstateError> {
        if !Planner::script_would_run(&*self.tracker, target, target_state)? {
            return Ok(Outcome::Unchanged);
        }
        self.log.debug(&format!("running script {target}"));
        let run = ScriptRun {
            name: target,
            dir: self.planner.dest_dir(),
            contents,
            interpreter,
        };
        // scripts may invoke dotstate themselves
        self.tracker.close()?;
        let result = self.system().run_script(&run);
        self.tracker.reopen()?;
        result?;
        if once {
            self.tracker.mark_script_run(target, contents)?;
            self.tracker.flush()?;
        }
        Ok(self.changed())
    }
}

fn actual_side(actual: &ActualState) -> Option<DiffSide<'_>> {
    match actual {
        ActualState::File { contents, perm } => Some(DiffSide {
            contents,
            perm: *perm,
        }),
        ActualState::Symlink { target } => Some(DiffSide {
            contents: target.as_bytes(),
            perm: 0o777,
        }),
        _ => None,
    }
}

fn target_side(target_state: &TargetStateEntry) -> Option<DiffSide<'_>> {
    match target_state {
        TargetStateEntry::File { contents, perm } | TargetStateEntry::Create { contents, perm } => {
            Some(DiffSide {
                contents,
                perm: *perm,
            })
        }
        TargetStateEntry::Symlink { target } => Some(DiffSide {
            contents: target.as_bytes(),
            perm: 0o777,
        }),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt as _;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::source::{PlainMarkers, ReadOptions, SourceData, SourceState};
    use crate::state::StateMode;
    use crate::system::{DryRunSystem, RealSystem, VerboseSystem};
    use crate::target::EvalOptions;
    use crate::template::TemplateEngine;
    use crate::template::tests::context;

    #[derive(Default)]
    struct Recorder {
        records: Mutex<Vec<(String, Outcome)>>,
    }

    impl Recorder {
        fn outcomes(&self) -> Vec<(String, Outcome)> {
            self.records.lock().unwrap().clone()
        }
    }

    impl Log for Recorder {
        fn stage(&self, _: &str) {}
        fn info(&self, _: &str) {}
        fn debug(&self, _: &str) {}
        fn warn(&self, _: &str) {}
        fn error(&self, _: &str) {}
        fn dry_run(&self, _: &str) {}
        fn record(&self, target: &str, outcome: Outcome, _: Option<&str>) {
            self.records.lock().unwrap().push((target.to_string(), outcome));
        }
    }

    struct Fixture {
        src: tempfile::TempDir,
        dest: tempfile::TempDir,
        engine: TemplateEngine,
        tracker: Tracker,
    }

    impl Fixture {
        fn new(files: &[(&str, &str)]) -> Self {
            let src = tempfile::tempdir().unwrap();
            for (rel, contents) in files {
                let path = src.path().join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, contents).unwrap();
            }
            Self {
                src,
                dest: tempfile::tempdir().unwrap(),
                engine: context(json!({"email": "a@b.com"}))
                    .engine(&SourceData::default())
                    .unwrap(),
                tracker: Tracker::in_memory(),
            }
        }

        fn dest(&self, rel: &str) -> PathBuf {
            self.dest.path().join(rel)
        }

        fn run_with(
            &mut self,
            system: &dyn System,
            options: ApplyOptions,
            prompter: &mut dyn Prompter,
            requested: &[&str],
        ) -> (Result<(), DotstateError>, Vec<(String, Outcome)>) {
            let source =
                SourceState::read(system, self.src.path(), &PlainMarkers, ReadOptions::default()).unwrap();
            let evaluator = Evaluator::new(
                &source,
                system,
                &self.engine,
                EvalOptions {
                    dest_dir: self.dest.path().to_path_buf(),
                    umask: 0o022,
                    decrypt: CommandSpec::new("cat"),
                    interpreters: BTreeMap::new(),
                },
            );
            let planner = Planner::new(&evaluator, system, options);
            let log = Recorder::default();
            let requested: Vec<String> = requested.iter().map(|s| s.to_string()).collect();
            let result = Engine::new(&planner, &mut self.tracker, prompter, &log).apply(&requested);
            (result, log.outcomes())
        }

        fn run(&mut self, options: ApplyOptions) -> (Result<(), DotstateError>, Vec<(String, Outcome)>) {
            let mut prompter = MockPrompter::new();
            prompter.expect_conflict().never();
            self.run_with(&RealSystem::new(), options, &mut prompter, &[])
        }

        fn status(&self) -> Vec<String> {
            let system = RealSystem::new();
            let source =
                SourceState::read(&system, self.src.path(), &PlainMarkers, ReadOptions::default()).unwrap();
            let evaluator = Evaluator::new(
                &source,
                &system,
                &self.engine,
                EvalOptions {
                    dest_dir: self.dest.path().to_path_buf(),
                    umask: 0o022,
                    decrypt: CommandSpec::new("cat"),
                    interpreters: BTreeMap::new(),
                },
            );
            Planner::new(&evaluator, &system, ApplyOptions::default())
                .status(&self.tracker, &[])
                .unwrap()
                .into_iter()
                .map(|l| l.to_string())
                .collect()
        }
    }

    fn mode(path: &Path) -> u32 {
        fs::symlink_metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn applies_files_and_private_dirs() {
        let mut f = Fixture::new(&[
            ("dot_bashrc", "# bashrc\n"),
            ("private_dot_ssh/private_config.tmpl", "User {{ email }}\n"),
        ]);
        let (result, _) = f.run(ApplyOptions::default());
        result.unwrap();
        assert_eq!(fs::read_to_string(f.dest(".bashrc")).unwrap(), "# bashrc\n");
        assert_eq!(mode(&f.dest(".bashrc")), 0o644);
        assert_eq!(fs::read_to_string(f.dest(".ssh/config")).unwrap(), "User a@b.com\n");
        assert_eq!(mode(&f.dest(".ssh")), 0o700);
        assert_eq!(mode(&f.dest(".ssh/config")), 0o600);
    }

    #[test]
    fn read_only_file_is_updated() {
        let mut f = Fixture::new(&[("readonly_dot_cfg", "v1\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(mode(&f.dest(".cfg")), 0o444);
        fs::write(f.src.path().join("readonly_dot_cfg"), "v2\n").unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(fs::read_to_string(f.dest(".cfg")).unwrap(), "v2\n");
        assert_eq!(mode(&f.dest(".cfg")), 0o444);
    }

    #[test]
    fn read_only_dir_is_populated() {
        let mut f = Fixture::new(&[("readonly_dot_d/file", "x\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        fs::write(f.src.path().join("readonly_dot_d/other"), "y\n").unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(fs::read_to_string(f.dest(".d/file")).unwrap(), "x\n");
        assert_eq!(fs::read_to_string(f.dest(".d/other")).unwrap(), "y\n");
        assert_eq!(mode(&f.dest(".d")), 0o555);
        fs::set_permissions(f.dest(".d"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn diff_creates_each_directory_once() {
        let mut f = Fixture::new(&[("private_dot_ssh/private_config", "x\n")]);
        let out_dir = tempfile::tempdir().unwrap();
        let out_path = out_dir.path().join("diff");
        let system = VerboseSystem::new(
            Box::new(DryRunSystem::quiet(Box::new(RealSystem::new()))),
            Box::new(fs::File::create(&out_path).unwrap()),
            f.dest.path(),
            false,
        );
        let mut prompter = MockPrompter::new();
        let options = ApplyOptions {
            dry_run: true,
            ..ApplyOptions::default()
        };
        f.run_with(&system, options, &mut prompter, &[]).0.unwrap();
        assert!(!f.dest(".ssh").exists());
        insta::assert_snapshot!(fs::read_to_string(&out_path).unwrap(), @r"
        mkdir -m 700 .ssh
        diff --git a/.ssh/config b/.ssh/config
        new file mode 100600
        --- /dev/null
        +++ b/.ssh/config
        @@ -0,0 +1 @@
        +x
        ");
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut f = Fixture::new(&[("dot_bashrc", "x\n"), ("dot_config/app.toml", "a = 1\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        let (result, outcomes) = f.run(ApplyOptions::default());
        result.unwrap();
        assert!(outcomes.iter().all(|(_, o)| *o == Outcome::Unchanged), "{outcomes:?}");
        assert!(f.status().is_empty());
    }

    #[test]
    fn dry_run_leaves_destination_alone() {
        let mut f = Fixture::new(&[("dot_bashrc", "x\n")]);
        let system = DryRunSystem::quiet(Box::new(RealSystem::new()));
        let mut prompter = MockPrompter::new();
        let options = ApplyOptions {
            dry_run: true,
            ..ApplyOptions::default()
        };
        let (result, outcomes) = f.run_with(&system, options, &mut prompter, &[]);
        result.unwrap();
        assert!(!f.dest(".bashrc").exists());
        assert_eq!(outcomes, vec![(".bashrc".to_string(), Outcome::DryRun)]);
    }

    #[test]
    fn local_edit_prompts_and_skip_keeps_it() {
        let mut f = Fixture::new(&[("dot_bashrc", "v1\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        fs::write(f.dest(".bashrc"), "local\n").unwrap();
        fs::write(f.src.path().join("dot_bashrc"), "v2\n").unwrap();

        let mut prompter = MockPrompter::new();
        prompter
            .expect_conflict()
            .withf(|target, diff| target == ".bashrc" && diff.contains("-local") && diff.contains("+v2"))
            .times(1)
            .returning(|_, _| Ok(Choice::Skip));
        let (result, outcomes) = f.run_with(&RealSystem::new(), ApplyOptions::default(), &mut prompter, &[]);
        result.unwrap();
        assert_eq!(fs::read_to_string(f.dest(".bashrc")).unwrap(), "local\n");
        assert_eq!(outcomes, vec![(".bashrc".to_string(), Outcome::Skipped)]);
    }

    #[test]
    fn quit_stops_the_run() {
        let mut f = Fixture::new(&[("dot_a", "v1\n"), ("dot_b", "v1\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        fs::write(f.dest(".a"), "local\n").unwrap();
        fs::write(f.src.path().join("dot_a"), "v2\n").unwrap();
        fs::write(f.src.path().join("dot_b"), "v2\n").unwrap();

        let mut prompter = MockPrompter::new();
        prompter.expect_conflict().returning(|_, _| Ok(Choice::Quit));
        let (result, _) = f.run_with(&RealSystem::new(), ApplyOptions::default(), &mut prompter, &[]);
        assert!(matches!(result, Err(DotstateError::Apply(ApplyError::Quit))));
        assert_eq!(fs::read_to_string(f.dest(".b")).unwrap(), "v1\n");
    }

    #[test]
    fn force_overwrites_without_prompting() {
        let mut f = Fixture::new(&[("dot_bashrc", "v1\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        fs::write(f.dest(".bashrc"), "local\n").unwrap();
        fs::write(f.src.path().join("dot_bashrc"), "v2\n").unwrap();
        let (result, _) = f.run(ApplyOptions {
            force: true,
            ..ApplyOptions::default()
        });
        result.unwrap();
        assert_eq!(fs::read_to_string(f.dest(".bashrc")).unwrap(), "v2\n");
    }

    #[test]
    fn first_apply_over_unknown_file_does_not_prompt() {
        let mut f = Fixture::new(&[("dot_bashrc", "managed\n")]);
        fs::write(f.dest(".bashrc"), "existing\n").unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(fs::read_to_string(f.dest(".bashrc")).unwrap(), "managed\n");
    }

    #[test]
    fn create_only_writes_missing_files() {
        let mut f = Fixture::new(&[("create_dot_a", "seed\n"), ("create_dot_b", "seed\n")]);
        fs::write(f.dest(".a"), "mine\n").unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(fs::read_to_string(f.dest(".a")).unwrap(), "mine\n");
        assert_eq!(fs::read_to_string(f.dest(".b")).unwrap(), "seed\n");
    }

    #[test]
    fn exact_dir_removes_unmanaged_children() {
        let mut f = Fixture::new(&[("exact_dot_vim/vimrc", "set nu\n")]);
        fs::create_dir_all(f.dest(".vim/stale")).unwrap();
        fs::write(f.dest(".vim/old"), "x").unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert!(f.dest(".vim/vimrc").exists());
        assert!(!f.dest(".vim/old").exists());
        assert!(!f.dest(".vim/stale").exists());
    }

    #[test]
    fn exact_dir_forgets_removed_subtree() {
        let mut f = Fixture::new(&[("exact_dot_vim/vimrc", "set nu\n"), ("exact_dot_vim/old/f", "x\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        assert!(f.tracker.entry_state(".vim/old/f").unwrap().is_some());

        fs::remove_dir_all(f.src.path().join("exact_dot_vim/old")).unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert!(!f.dest(".vim/old").exists());
        assert!(f.tracker.entry_state(".vim/old").unwrap().is_none());
        assert!(f.tracker.entry_state(".vim/old/f").unwrap().is_none());
        assert!(f.tracker.entry_state(".vim/vimrc").unwrap().is_some());
    }

    #[test]
    fn remove_entries_and_empty_files_delete_targets() {
        let mut f = Fixture::new(&[("remove_dot_old", ""), ("dot_empty", "")]);
        fs::write(f.dest(".old"), "x").unwrap();
        fs::write(f.dest(".empty"), "x").unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert!(!f.dest(".old").exists());
        assert!(!f.dest(".empty").exists());
    }

    #[test]
    fn symlinks_replace_files() {
        let mut f = Fixture::new(&[("symlink_dot_link", "/etc/hosts\n")]);
        fs::write(f.dest(".link"), "x").unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(fs::read_link(f.dest(".link")).unwrap(), Path::new("/etc/hosts"));
    }

    #[test]
    fn scripts_run_in_phase_order() {
        let mut f = Fixture::new(&[
            ("run_after_010_last.sh", "#!/bin/sh\necho last >> log\n"),
            ("run_before_020_second.sh", "#!/bin/sh\necho second >> log\n"),
            ("run_before_010_first.sh", "#!/bin/sh\necho first >> log\n"),
            ("run_middle.sh", "#!/bin/sh\necho middle >> log\n"),
        ]);
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(
            fs::read_to_string(f.dest("log")).unwrap(),
            "first\nsecond\nmiddle\nlast\n"
        );
    }

    #[test]
    fn once_scripts_run_once_per_contents() {
        let mut f = Fixture::new(&[("run_once_setup.sh", "#!/bin/sh\necho ran >> log\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(fs::read_to_string(f.dest("log")).unwrap(), "ran\n");

        fs::write(
            f.src.path().join("run_once_setup.sh"),
            "#!/bin/sh\necho changed >> log\n",
        )
        .unwrap();
        f.run(ApplyOptions::default()).0.unwrap();
        assert_eq!(fs::read_to_string(f.dest("log")).unwrap(), "ran\nchanged\n");
    }

    #[test]
    fn once_marker_is_saved_before_later_failures() {
        let script = "#!/bin/sh\necho ran >> log\n";
        let mut f = Fixture::new(&[("run_once_before_010_setup.sh", script), ("dot_bad.tmpl", "{{ missing }}")]);
        let state_dir = tempfile::tempdir().unwrap();
        let state_path = state_dir.path().join("state.json");
        f.tracker = Tracker::open(&state_path, StateMode::ReadWrite).unwrap();

        let (result, _) = f.run(ApplyOptions::default());
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(f.dest("log")).unwrap(), "ran\n");
        let saved = Tracker::open(&state_path, StateMode::ReadOnly).unwrap();
        assert!(saved.script_has_run("setup.sh", script.as_bytes()).unwrap());
    }

    #[test]
    fn blank_scripts_never_run() {
        let mut f = Fixture::new(&[("run_blank.sh", "  \n\n")]);
        let (result, outcomes) = f.run(ApplyOptions::default());
        result.unwrap();
        assert_eq!(outcomes, vec![("blank.sh".to_string(), Outcome::Unchanged)]);
    }

    #[test]
    fn keep_going_counts_failures() {
        let mut f = Fixture::new(&[("dot_bad.tmpl", "{{ missing }}"), ("dot_good", "ok\n")]);
        let (result, outcomes) = f.run(ApplyOptions {
            keep_going: true,
            ..ApplyOptions::default()
        });
        assert!(matches!(result, Err(DotstateError::Apply(ApplyError::Incomplete(1)))));
        assert_eq!(fs::read_to_string(f.dest(".good")).unwrap(), "ok\n");
        assert!(outcomes.contains(&(".bad".to_string(), Outcome::Failed)));
    }

    #[test]
    fn without_keep_going_first_failure_aborts() {
        let mut f = Fixture::new(&[("dot_a.tmpl", "{{ missing }}"), ("dot_b", "ok\n")]);
        let (result, _) = f.run(ApplyOptions::default());
        assert!(matches!(result, Err(DotstateError::Eval(_))));
        assert!(!f.dest(".b").exists());
    }

    #[test]
    fn requested_target_brings_its_parents() {
        let mut f = Fixture::new(&[("private_dot_ssh/config", "x\n"), ("dot_other", "y\n")]);
        let mut prompter = MockPrompter::new();
        let (result, _) =
            f.run_with(&RealSystem::new(), ApplyOptions::default(), &mut prompter, &[".ssh/config"]);
        result.unwrap();
        assert_eq!(mode(&f.dest(".ssh")), 0o700);
        assert!(f.dest(".ssh/config").exists());
        assert!(!f.dest(".other").exists());
    }

    #[test]
    fn unmanaged_request_is_an_error() {
        let mut f = Fixture::new(&[("dot_a", "x\n")]);
        let mut prompter = MockPrompter::new();
        let (result, _) =
            f.run_with(&RealSystem::new(), ApplyOptions::default(), &mut prompter, &[".nope"]);
        assert!(matches!(result, Err(DotstateError::Apply(ApplyError::NotManaged(ref t))) if t == ".nope"));
    }

    #[test]
    fn exclude_scripts() {
        let mut f = Fixture::new(&[("run_x.sh", "#!/bin/sh\ntouch ran\n"), ("dot_a", "x\n")]);
        let (result, _) = f.run(ApplyOptions {
            exclude: "scripts".parse().unwrap(),
            ..ApplyOptions::default()
        });
        result.unwrap();
        assert!(!f.dest("ran").exists());
        assert!(f.dest(".a").exists());
    }

    #[test]
    fn status_reports_pending_changes() {
        let mut f = Fixture::new(&[("dot_a", "x\n"), ("dot_b", "y\n")]);
        f.run(ApplyOptions::default()).0.unwrap();
        fs::write(f.src.path().join("dot_b"), "z\n").unwrap();
        fs::write(f.src.path().join("dot_c"), "new\n").unwrap();
        fs::write(f.dest(".a"), "edited\n").unwrap();
        assert_eq!(f.status(), vec!["MM .a", " M .b", " A .c"]);
    }
}
