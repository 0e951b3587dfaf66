//! Source state: the decoded view of the source directory.
//!
//! [`SourceState::read`] walks the source tree through a [`System`], decodes
//! every entry name with the attribute codec and intercepts the `.dotstate*`
//! marker files. Entries are keyed by slash-separated target-relative path,
//! so iteration yields parents before their children.

mod entry;
pub mod mutate;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use entry::{EntryType, EntryTypeSet, SourceEntry};

use crate::attr::{DirAttr, FileAttr};
use crate::error::{AttrError, EvalError, SourceError};
use crate::pattern::PatternSet;
use crate::system::{self, FileType, System};

/// Prefix shared by every marker file name.
pub const MARKER_PREFIX: &str = ".dotstate";
/// Ignore pattern file.
pub const IGNORE_FILE: &str = ".dotstateignore";
/// Remove pattern file.
pub const REMOVE_FILE: &str = ".dotstateremove";
/// Minimum version marker.
pub const VERSION_FILE: &str = ".dotstateversion";
/// Source template data, root only.
pub const DATA_FILE: &str = ".dotstatedata.toml";
/// Shared templates directory, root only.
pub const TEMPLATES_DIR: &str = ".dotstatetemplates";

/// Template data and shared templates declared by the source tree.
#[derive(Debug, Clone, Default)]
pub struct SourceData {
    /// Contents of the data file.
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Shared templates by slash-separated name.
    pub templates: BTreeMap<String, String>,
}

/// Renders ignore and remove marker files before they are parsed.
pub trait MarkerRenderer {
    /// Render `contents` of the marker file `name`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Template`] if rendering fails.
    fn render_marker(
        &self,
        name: &str,
        contents: &str,
        source: &SourceData,
    ) -> Result<String, EvalError>;
}

/// Renderer that returns marker contents unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainMarkers;

impl MarkerRenderer for PlainMarkers {
    fn render_marker(&self, _: &str, contents: &str, _: &SourceData) -> Result<String, EvalError> {
        Ok(contents.to_string())
    }
}

/// Options for [`SourceState::read`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Collect per-entry errors instead of failing on the first.
    pub keep_going: bool,
}

/// The decoded source tree.
#[derive(Debug, Default)]
pub struct SourceState {
    root: PathBuf,
    entries: BTreeMap<String, SourceEntry>,
    ignore: PatternSet,
    remove: PatternSet,
    min_version: Option<semver::Version>,
    source_data: SourceData,
    errors: Vec<SourceError>,
}

impl SourceState {
    /// Walk the source tree rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] for the first failure, or only for failures
    /// outside individual entries when `options.keep_going` is set.
    pub fn read(
        system: &dyn System,
        root: &Path,
        renderer: &dyn MarkerRenderer,
        options: ReadOptions,
    ) -> Result<Self, SourceError> {
        let mut state = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };
        if system::lstat_opt(system, root)?.is_none() {
            tracing::debug!("source directory {} does not exist", root.display());
            return Ok(state);
        }
        let walker = Walker {
            system,
            renderer,
            options,
        };
        walker.walk_dir(&mut state, Path::new(""), "")?;
        Ok(state)
    }

    /// Absolute path of the source directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All entries in target path order.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = (&str, &SourceEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up the entry for a target-relative path.
    #[must_use]
    pub fn get(&self, target: &str) -> Option<&SourceEntry> {
        self.entries.get(target)
    }

    /// Return `true` if `target` is managed.
    #[must_use]
    pub fn contains(&self, target: &str) -> bool {
        self.entries.contains_key(target)
    }

    /// Absolute source path of the entry for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotManaged`] if `target` has no entry.
    pub fn source_path(&self, target: &str) -> Result<PathBuf, SourceError> {
        self.get(target)
            .map(|e| self.root.join(e.source_rel()))
            .ok_or_else(|| SourceError::NotManaged(target.to_string()))
    }

    /// Managed targets under `dir` (excluding `dir` itself).
    pub fn descendants<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = format!("{dir}/");
        self.entries
            .keys()
            .filter(move |k| dir.is_empty() || k.starts_with(&prefix))
            .map(String::as_str)
    }

    /// Names of the managed direct children of the directory `dir`.
    pub fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.descendants(dir).filter_map(move |k| {
            let rest = if dir.is_empty() {
                k
            } else {
                k.get(dir.len() + 1..)?
            };
            (!rest.contains('/')).then_some(rest)
        })
    }

    /// Return `true` if `target` matches the ignore patterns.
    #[must_use]
    pub fn is_ignored(&self, target: &str) -> bool {
        self.ignore.matches(target)
    }

    /// Remove patterns collected from the tree.
    #[must_use]
    pub const fn remove_patterns(&self) -> &PatternSet {
        &self.remove
    }

    /// Highest version required by a version marker.
    #[must_use]
    pub const fn min_version(&self) -> Option<&semver::Version> {
        self.min_version.as_ref()
    }

    /// Data file contents and shared templates.
    #[must_use]
    pub const fn source_data(&self) -> &SourceData {
        &self.source_data
    }

    /// Per-entry errors collected under keep-going.
    #[must_use]
    pub fn errors(&self) -> &[SourceError] {
        &self.errors
    }

    /// Refuse to continue if the running version is older than required.
    ///
    /// Development builds skip the check.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::VersionTooOld`].
    pub fn check_version(&self, running: &semver::Version, dev_build: bool) -> Result<(), SourceError> {
        match &self.min_version {
            Some(required) if !dev_build && running < required => Err(SourceError::VersionTooOld {
                required: required.clone(),
                running: running.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Destination paths matched by remove patterns that are neither managed
    /// nor ignored, in target path order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::System`] if the destination cannot be read.
    pub fn remove_targets(&self, system: &dyn System, dest: &Path) -> Result<Vec<String>, SourceError> {
        let mut found = std::collections::BTreeSet::new();
        for pattern in self.remove.include_patterns() {
            for target in system::glob::expand(system, dest, pattern)? {
                if self.remove.matches(&target) && !self.contains(&target) && !self.is_ignored(&target) {
                    found.insert(target);
                }
            }
        }
        Ok(found.into_iter().collect())
    }
}

struct Walker<'a> {
    system: &'a dyn System,
    renderer: &'a dyn MarkerRenderer,
    options: ReadOptions,
}

impl Walker<'_> {
    fn walk_dir(
        &self,
        state: &mut SourceState,
        source_dir: &Path,
        target_dir: &str,
    ) -> Result<(), SourceError> {
        let abs = state.root.join(source_dir);
        let names = self.system.read_dir(&abs)?;
        let is_root = target_dir.is_empty();

        // version, data and templates must be known before patterns render
        for name in names.iter().filter(|n| n.starts_with(MARKER_PREFIX)) {
            match name.as_str() {
                VERSION_FILE => self.read_version(state, &source_dir.join(name))?,
                DATA_FILE if is_root => self.read_data(state, &source_dir.join(name))?,
                TEMPLATES_DIR if is_root => {
                    self.read_templates(state, &source_dir.join(name), "")?;
                }
                _ => {}
            }
        }
        for name in names.iter().filter(|n| n.starts_with(MARKER_PREFIX)) {
            let base = name
                .strip_suffix(crate::attr::TEMPLATE_SUFFIX)
                .unwrap_or(name);
            if base == IGNORE_FILE || base == REMOVE_FILE {
                self.read_patterns(state, &source_dir.join(name), target_dir, base == IGNORE_FILE)?;
            } else if ![VERSION_FILE, DATA_FILE, TEMPLATES_DIR].contains(&name.as_str()) {
                tracing::debug!("skipping unknown marker {}", source_dir.join(name).display());
            }
        }

        let mut decoded = Vec::new();
        for name in names.iter().filter(|n| !n.starts_with('.')) {
            let source_rel = source_dir.join(name);
            match self.decode(state, &source_rel, name) {
                Ok(entry) => decoded.push(entry),
                Err(e) => self.fail(state, e)?,
            }
        }
        decoded.sort_by(|a, b| a.target_name().cmp(b.target_name()));

        for entry in decoded {
            let target = join_target(target_dir, entry.target_name());
            if state.ignore.matches(&target) {
                tracing::debug!("ignoring {target}");
                continue;
            }
            if let Some(first) = state.entries.get(&target) {
                let err = SourceError::DuplicateTarget {
                    target,
                    first: first.source_rel().to_path_buf(),
                    second: entry.source_rel().to_path_buf(),
                };
                self.fail(state, err)?;
                continue;
            }
            let sub_dir = match &entry {
                SourceEntry::Dir { source_rel, .. } => Some(source_rel.clone()),
                SourceEntry::File { .. } => None,
            };
            state.entries.insert(target.clone(), entry);
            if let Some(sub_dir) = sub_dir {
                self.walk_dir(state, &sub_dir, &target)?;
            }
        }
        Ok(())
    }

    fn fail(&self, state: &mut SourceState, err: SourceError) -> Result<(), SourceError> {
        if !self.options.keep_going {
            return Err(err);
        }
        tracing::error!("{err}");
        state.errors.push(err);
        Ok(())
    }

    fn decode(
        &self,
        state: &SourceState,
        source_rel: &Path,
        name: &str,
    ) -> Result<SourceEntry, SourceError> {
        let attr_err = |source| SourceError::Attr {
            path: source_rel.to_path_buf(),
            source,
        };
        // directory listings replace undecodable bytes
        if name.contains(char::REPLACEMENT_CHARACTER) {
            return Err(attr_err(AttrError::NonUtf8 {
                segment: name.to_string(),
            }));
        }
        let info = self.system.lstat(&state.root.join(source_rel))?;
        match info.file_type {
            FileType::Dir => Ok(SourceEntry::Dir {
                source_rel: source_rel.to_path_buf(),
                attr: DirAttr::decode(name).map_err(attr_err)?,
            }),
            FileType::File => Ok(SourceEntry::File {
                source_rel: source_rel.to_path_buf(),
                attr: FileAttr::decode(name).map_err(attr_err)?,
            }),
            FileType::Symlink | FileType::Other => Err(SourceError::Unsupported {
                path: source_rel.to_path_buf(),
            }),
        }
    }

    fn read_text(&self, state: &SourceState, source_rel: &Path) -> Result<String, SourceError> {
        let bytes = self.system.read_file(&state.root.join(source_rel))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn read_version(&self, state: &mut SourceState, source_rel: &Path) -> Result<(), SourceError> {
        let text = self.read_text(state, source_rel)?;
        let version = semver::Version::parse(text.trim()).map_err(|e| SourceError::InvalidVersion {
            path: source_rel.to_path_buf(),
            message: e.to_string(),
        })?;
        if state.min_version.as_ref().is_none_or(|v| version > *v) {
            state.min_version = Some(version);
        }
        Ok(())
    }

    fn read_data(&self, state: &mut SourceState, source_rel: &Path) -> Result<(), SourceError> {
        let text = self.read_text(state, source_rel)?;
        state.source_data.data = toml::from_str(&text).map_err(|e| SourceError::InvalidData {
            path: source_rel.to_path_buf(),
            message: e.message().to_string(),
        })?;
        Ok(())
    }

    fn read_templates(
        &self,
        state: &mut SourceState,
        source_rel: &Path,
        prefix: &str,
    ) -> Result<(), SourceError> {
        for name in self.system.read_dir(&state.root.join(source_rel))? {
            let child = source_rel.join(&name);
            let key = join_target(prefix, &name);
            if self.system.lstat(&state.root.join(&child))?.is_dir() {
                self.read_templates(state, &child, &key)?;
            } else {
                let text = self.read_text(state, &child)?;
                state.source_data.templates.insert(key, text);
            }
        }
        Ok(())
    }

    fn read_patterns(
        &self,
        state: &mut SourceState,
        source_rel: &Path,
        target_dir: &str,
        ignore: bool,
    ) -> Result<(), SourceError> {
        let name = source_rel.to_string_lossy().replace('\\', "/");
        let raw = self.read_text(state, source_rel)?;
        let rendered = self
            .renderer
            .render_marker(&name, &raw, &state.source_data)?;
        let set = if ignore {
            &mut state.ignore
        } else {
            &mut state.remove
        };
        set.parse(&name, &rendered, target_dir)?;
        Ok(())
    }
}

/// Join a target directory and a child name with `/`.
#[must_use]
pub fn join_target(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
