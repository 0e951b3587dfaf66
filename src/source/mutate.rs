//! Source tree mutations: `add`, `chattr` and `import`.
//!
//! Every change goes through the execution system, so dry-run and verbose
//! decorators apply to the source tree the same way they apply to the
//! destination.
use std::collections::BTreeMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{SourceEntry, SourceState, join_target};
use crate::attr::{DirAttr, FileAttr, SourceFileKind};
use crate::error::{SourceError, SystemError};
use crate::exec::CommandSpec;
use crate::system::{FileInfo, FileType, System, lstat_opt};

/// Permission bits for files written into the source tree.
const SOURCE_FILE_PERM: u32 = 0o644;
/// Permission bits for directories created in the source tree.
const SOURCE_DIR_PERM: u32 = 0o755;

/// Options for [`Mutator::add`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Store files as templates.
    pub template: bool,
    /// Encrypt file contents.
    pub encrypt: bool,
    /// Store files as create-only.
    pub create: bool,
    /// Mark added directories exact.
    pub exact: bool,
    /// Add everything below added directories.
    pub recursive: bool,
}

/// Options for [`Mutator::import`].
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Target-relative directory the archive is unpacked under.
    pub dest: String,
    /// Leading path components dropped from archive member names.
    pub strip_components: usize,
    /// Mark imported directories exact.
    pub exact: bool,
}

/// Commands that encrypt and decrypt stdin to stdout.
#[derive(Debug, Clone, Default)]
pub struct Crypto {
    /// Encryption command.
    pub encrypt: CommandSpec,
    /// Decryption command.
    pub decrypt: CommandSpec,
}

/// Writes changes into the source tree described by a [`SourceState`].
#[derive(Debug)]
pub struct Mutator<'a> {
    system: &'a dyn System,
    source: &'a SourceState,
    dest_dir: &'a Path,
    crypto: &'a Crypto,
    /// Source-relative paths of directories resolved or created so far.
    dirs: BTreeMap<String, PathBuf>,
}

impl<'a> Mutator<'a> {
    /// Create a mutator for `source`, reading destination files below
    /// `dest_dir`.
    #[must_use]
    pub fn new(
        system: &'a dyn System,
        source: &'a SourceState,
        dest_dir: &'a Path,
        crypto: &'a Crypto,
    ) -> Self {
        Self {
            system,
            source,
            dest_dir,
            crypto,
            dirs: BTreeMap::new(),
        }
    }

    fn abs(&self, source_rel: &Path) -> PathBuf {
        self.source.root().join(source_rel)
    }

    /// Source-relative path of the directory that holds `dir_target`,
    /// creating it and its missing ancestors in the source tree.
    ///
    /// Created directories take their attributes from the matching
    /// destination directory.
    fn source_dir(&mut self, dir_target: &str) -> Result<PathBuf, SourceError> {
        if dir_target.is_empty() {
            return Ok(PathBuf::new());
        }
        if let Some(rel) = self.dirs.get(dir_target) {
            return Ok(rel.clone());
        }
        let rel = match self.source.get(dir_target) {
            Some(SourceEntry::Dir { source_rel, .. }) => {
                let (parent, _) = split_target(dir_target);
                let parent_rel = self.source_dir(parent)?;
                parent_rel.join(file_name(source_rel))
            }
            Some(SourceEntry::File { source_rel, .. }) => {
                return Err(SourceError::Unsupported {
                    path: source_rel.clone(),
                });
            }
            None => {
                let (parent, name) = split_target(dir_target);
                let parent_rel = self.source_dir(parent)?;
                let info = lstat_opt(self.system, &self.dest_dir.join(dir_target))?;
                let attr = DirAttr {
                    target_name: name.to_string(),
                    exact: false,
                    private: info.is_some_and(|i| i.perm & 0o077 == 0),
                    readonly: info.is_some_and(|i| i.perm & 0o222 == 0),
                };
                let rel = parent_rel.join(attr.source_name());
                if lstat_opt(self.system, &self.abs(&rel))?.is_none() {
                    self.system.mkdir(&self.abs(&rel), SOURCE_DIR_PERM)?;
                }
                rel
            }
        };
        self.dirs.insert(dir_target.to_string(), rel.clone());
        Ok(rel)
    }

    /// Copy destination targets into the source tree, encoding their
    /// permissions and type in the entry names.
    ///
    /// Re-adding a managed target replaces its source entry; if the
    /// attributes changed the old entry is renamed or removed. Ignored
    /// targets are skipped. Returns the source-relative paths written.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if a target is missing, of an unsupported
    /// type, or a write fails.
    pub fn add(&mut self, targets: &[String], options: &AddOptions) -> Result<Vec<PathBuf>, SourceError> {
        let mut expanded = Vec::new();
        for target in targets {
            let target = target.trim_end_matches('/');
            expanded.push(target.to_string());
            if options.recursive {
                self.walk_dest(target, &mut expanded)?;
            }
        }
        expanded.sort();
        expanded.dedup();

        let mut written = Vec::new();
        for target in &expanded {
            if self.source.is_ignored(target) {
                tracing::debug!("{target}: ignored");
                continue;
            }
            let path = self.dest_dir.join(target);
            let info = self.system.lstat(&path)?;
            let rel = match info.file_type {
                FileType::Dir => self.add_dir(target, info, options.exact)?,
                FileType::File => {
                    let contents = self.system.read_file(&path)?;
                    let mut attr = FileAttr::new(
                        if options.create {
                            SourceFileKind::Create
                        } else {
                            SourceFileKind::File
                        },
                        split_target(target).1,
                    );
                    attr.empty = contents.is_empty() && !options.create;
                    attr.executable = info.perm & 0o111 != 0;
                    attr.private = info.perm & 0o077 == 0;
                    attr.readonly = info.perm & 0o222 == 0;
                    attr.template = options.template;
                    attr.encrypted = options.encrypt;
                    self.add_file(target, &attr, &contents)?
                }
                FileType::Symlink => {
                    let link = self.system.read_link(&path)?;
                    let attr = FileAttr::new(SourceFileKind::Symlink, split_target(target).1);
                    let contents = format!("{}\n", link.to_string_lossy());
                    self.add_file(target, &attr, contents.as_bytes())?
                }
                FileType::Other => return Err(SourceError::Unsupported { path }),
            };
            written.push(rel);
        }
        Ok(written)
    }

    /// Append every destination path below `dir` to `out`.
    fn walk_dest(&self, dir: &str, out: &mut Vec<String>) -> Result<(), SourceError> {
        let path = self.dest_dir.join(dir);
        if !lstat_opt(self.system, &path)?.is_some_and(|i| i.is_dir()) {
            return Ok(());
        }
        for name in self.system.read_dir(&path)? {
            let child = join_target(dir, &name);
            out.push(child.clone());
            self.walk_dest(&child, out)?;
        }
        Ok(())
    }

    fn add_dir(&mut self, target: &str, info: FileInfo, exact: bool) -> Result<PathBuf, SourceError> {
        let (parent, name) = split_target(target);
        let parent_rel = self.source_dir(parent)?;
        let attr = DirAttr {
            target_name: name.to_string(),
            exact,
            private: info.perm & 0o077 == 0,
            readonly: info.perm & 0o222 == 0,
        };
        let rel = parent_rel.join(attr.source_name());
        match self.source.get(target) {
            Some(SourceEntry::Dir { source_rel, .. }) => {
                let old = parent_rel.join(file_name(source_rel));
                if old != rel {
                    self.system.rename(&self.abs(&old), &self.abs(&rel))?;
                }
            }
            Some(SourceEntry::File { source_rel, .. }) => {
                self.system
                    .remove_all(&self.abs(&parent_rel.join(file_name(source_rel))))?;
                self.system.mkdir(&self.abs(&rel), SOURCE_DIR_PERM)?;
            }
            None => {
                if lstat_opt(self.system, &self.abs(&rel))?.is_none() {
                    self.system.mkdir(&self.abs(&rel), SOURCE_DIR_PERM)?;
                }
            }
        }
        self.dirs.insert(target.to_string(), rel.clone());
        Ok(rel)
    }

    fn add_file(&mut self, target: &str, attr: &FileAttr, contents: &[u8]) -> Result<PathBuf, SourceError> {
        let (parent, _) = split_target(target);
        let parent_rel = self.source_dir(parent)?;
        let rel = parent_rel.join(attr.source_name());
        let stored = if attr.encrypted {
            self.system.run_capture(&self.crypto.encrypt, Some(contents))?
        } else {
            contents.to_vec()
        };
        self.system
            .write_file(&self.abs(&rel), &stored, SOURCE_FILE_PERM)?;
        if let Some(entry) = self.source.get(target) {
            let old = parent_rel.join(file_name(entry.source_rel()));
            if old != rel {
                self.system.remove_all(&self.abs(&old))?;
            }
        }
        Ok(rel)
    }

    /// Change the attributes of managed targets by renaming their source
    /// entries. Children are renamed before their parents.
    ///
    /// Toggling encryption rewrites the contents through the configured
    /// commands. Returns `(old, new)` source-relative paths of every rename.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotManaged`] for an unmanaged target, or the
    /// first system failure.
    pub fn chattr(
        &mut self,
        modifiers: &AttrModifiers,
        targets: &[String],
    ) -> Result<Vec<(PathBuf, PathBuf)>, SourceError> {
        let mut renames = Vec::new();
        for target in targets {
            let target = target.trim_end_matches('/');
            let entry = self
                .source
                .get(target)
                .ok_or_else(|| SourceError::NotManaged(target.to_string()))?;
            let old = entry.source_rel().to_path_buf();
            let new_name = match entry {
                SourceEntry::Dir { attr, .. } => modifiers.apply_dir(attr).source_name(),
                SourceEntry::File { attr, .. } => modifiers.apply_file(attr).source_name(),
            };
            let new = old.with_file_name(new_name);
            if new != old {
                renames.push((old, new, entry));
            }
        }
        renames.sort_by(|a, b| b.0.cmp(&a.0));

        let mut done = Vec::new();
        for (old, new, entry) in renames {
            match entry {
                SourceEntry::File { attr, .. } if modifiers.apply_file(attr).encrypted != attr.encrypted => {
                    let contents = self.system.read_file(&self.abs(&old))?;
                    let command = if attr.encrypted {
                        &self.crypto.decrypt
                    } else {
                        &self.crypto.encrypt
                    };
                    let converted = self.system.run_capture(command, Some(&contents))?;
                    self.system
                        .write_file(&self.abs(&new), &converted, SOURCE_FILE_PERM)?;
                    self.system.remove_all(&self.abs(&old))?;
                }
                _ => self.system.rename(&self.abs(&old), &self.abs(&new))?,
            }
            done.push((old, new));
        }
        Ok(done)
    }

    /// Unpack a tar archive (optionally gzip-compressed) into the source
    /// tree as if each member had been added from the destination.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the archive cannot be read or a write
    /// fails.
    pub fn import(&mut self, archive: &[u8], options: &ImportOptions) -> Result<Vec<PathBuf>, SourceError> {
        let archive_err = |e: std::io::Error| SourceError::System(SystemError::io("read", "<archive>", e));
        let reader: Box<dyn std::io::Read + '_> = if archive.starts_with(&[0x1f, 0x8b]) {
            Box::new(flate2::read::GzDecoder::new(archive))
        } else {
            Box::new(archive)
        };
        let mut tar = tar::Archive::new(reader);
        let mut written = Vec::new();

        for member in tar.entries().map_err(archive_err)? {
            let mut member = member.map_err(archive_err)?;
            let name = member.path().map_err(archive_err)?.to_string_lossy().into_owned();
            let Some(rel) = strip_components(&name, options.strip_components) else {
                continue;
            };
            let target = join_target(options.dest.trim_end_matches('/'), &rel);
            if self.source.is_ignored(&target) {
                continue;
            }
            let perm = member.header().mode().map_err(archive_err)? & 0o777;
            let info = |file_type| FileInfo {
                file_type,
                perm,
                size: 0,
            };
            let (_, base) = split_target(&target);
            let rel_path = match member.header().entry_type() {
                tar::EntryType::Directory => self.add_dir(&target, info(FileType::Dir), options.exact)?,
                tar::EntryType::Regular => {
                    let mut contents = Vec::new();
                    member.read_to_end(&mut contents).map_err(archive_err)?;
                    let mut attr = FileAttr::new(SourceFileKind::File, base);
                    attr.empty = contents.is_empty();
                    attr.executable = perm & 0o111 != 0;
                    attr.private = perm & 0o077 == 0;
                    attr.readonly = perm & 0o222 == 0;
                    self.add_file(&target, &attr, &contents)?
                }
                tar::EntryType::Symlink => {
                    let link = member
                        .link_name()
                        .map_err(archive_err)?
                        .map(|l| l.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let attr = FileAttr::new(SourceFileKind::Symlink, base);
                    self.add_file(&target, &attr, format!("{link}\n").as_bytes())?
                }
                other => {
                    tracing::warn!("{name}: skipping unsupported archive member type {other:?}");
                    continue;
                }
            };
            written.push(rel_path);
        }
        Ok(written)
    }
}

/// Split a target path into its parent and base name.
fn split_target(target: &str) -> (&str, &str) {
    target.rsplit_once('/').unwrap_or(("", target))
}

fn file_name(path: &Path) -> &std::ffi::OsStr {
    path.file_name().unwrap_or(path.as_os_str())
}

/// Drop `n` leading components of an archive member name, returning
/// `None` when nothing is left.
fn strip_components(name: &str, n: usize) -> Option<String> {
    let parts: Vec<&str> = name
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .skip(n)
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Requested attribute changes parsed from `+private,-executable,notemplate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrModifiers {
    empty: Option<bool>,
    encrypted: Option<bool>,
    exact: Option<bool>,
    executable: Option<bool>,
    once: Option<bool>,
    private: Option<bool>,
    readonly: Option<bool>,
    template: Option<bool>,
}

impl AttrModifiers {
    /// Attributes of a directory after modification.
    #[must_use]
    pub fn apply_dir(&self, attr: &DirAttr) -> DirAttr {
        DirAttr {
            target_name: attr.target_name.clone(),
            exact: self.exact.unwrap_or(attr.exact),
            private: self.private.unwrap_or(attr.private),
            readonly: self.readonly.unwrap_or(attr.readonly),
        }
    }

    /// Attributes of a file after modification. Modifiers that do not apply
    /// to the entry's kind are ignored.
    #[must_use]
    pub fn apply_file(&self, attr: &FileAttr) -> FileAttr {
        let mut out = attr.clone();
        let regular = matches!(attr.kind, SourceFileKind::File | SourceFileKind::Create);
        let has_perm = regular || attr.kind == SourceFileKind::Modify;
        if attr.kind != SourceFileKind::Remove {
            out.template = self.template.unwrap_or(attr.template);
        }
        if attr.kind == SourceFileKind::File {
            out.empty = self.empty.unwrap_or(attr.empty);
        }
        if regular {
            out.encrypted = self.encrypted.unwrap_or(attr.encrypted);
        }
        if has_perm {
            out.executable = self.executable.unwrap_or(attr.executable);
            out.private = self.private.unwrap_or(attr.private);
            out.readonly = self.readonly.unwrap_or(attr.readonly);
        }
        if attr.kind == SourceFileKind::Script {
            out.once = self.once.unwrap_or(attr.once);
        }
        out
    }
}

impl FromStr for AttrModifiers {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = Self::default();
        for word in s.split(',').map(str::trim).filter(|w| !w.is_empty()) {
            let (value, name) = if let Some(rest) = word.strip_prefix('+') {
                (true, rest)
            } else if let Some(rest) = word.strip_prefix('-') {
                (false, rest)
            } else if let Some(rest) = word.strip_prefix("no")
                && !rest.is_empty()
            {
                (false, rest)
            } else {
                (true, word)
            };
            let slot = match name {
                "empty" | "e" => &mut out.empty,
                "encrypted" | "encrypt" => &mut out.encrypted,
                "exact" => &mut out.exact,
                "executable" | "x" => &mut out.executable,
                "once" | "o" => &mut out.once,
                "private" | "p" => &mut out.private,
                "readonly" | "r" => &mut out.readonly,
                "template" | "t" => &mut out.template,
                _ => return Err(format!("unknown attribute '{word}'")),
            };
            *slot = Some(value);
        }
        Ok(out)
    }
}
