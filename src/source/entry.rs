//! Source entries and entry-type filters.
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::attr::{DirAttr, FileAttr, SourceFileKind};

/// One decoded entry of the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEntry {
    /// A source directory.
    Dir {
        /// Path relative to the source root.
        source_rel: PathBuf,
        /// Decoded attributes.
        attr: DirAttr,
    },
    /// A source file.
    File {
        /// Path relative to the source root.
        source_rel: PathBuf,
        /// Decoded attributes.
        attr: FileAttr,
    },
}

impl SourceEntry {
    /// Path relative to the source root.
    #[must_use]
    pub fn source_rel(&self) -> &Path {
        match self {
            Self::Dir { source_rel, .. } | Self::File { source_rel, .. } => source_rel,
        }
    }

    /// Name of the entry in the destination.
    #[must_use]
    pub fn target_name(&self) -> &str {
        match self {
            Self::Dir { attr, .. } => &attr.target_name,
            Self::File { attr, .. } => &attr.target_name,
        }
    }

    /// Entry type used for filtering.
    #[must_use]
    pub const fn entry_type(&self) -> EntryType {
        match self {
            Self::Dir { .. } => EntryType::Dirs,
            Self::File { attr, .. } => match attr.kind {
                SourceFileKind::File | SourceFileKind::Create | SourceFileKind::Modify => {
                    EntryType::Files
                }
                SourceFileKind::Script => EntryType::Scripts,
                SourceFileKind::Symlink => EntryType::Symlinks,
                SourceFileKind::Remove => EntryType::Remove,
            },
        }
    }

    /// Return `true` for script entries.
    #[must_use]
    pub const fn is_script(&self) -> bool {
        matches!(self, Self::File { attr, .. } if matches!(attr.kind, SourceFileKind::Script))
    }
}

/// Categories an entry can be filtered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryType {
    /// Directories.
    Dirs,
    /// Files, create-files and modify-files.
    Files,
    /// Remove markers and remove patterns.
    Remove,
    /// Scripts.
    Scripts,
    /// Symlinks.
    Symlinks,
    /// Entries whose source is encrypted.
    Encrypted,
    /// Entries whose source is a template.
    Templates,
}

impl EntryType {
    const ALL: [Self; 7] = [
        Self::Dirs,
        Self::Files,
        Self::Remove,
        Self::Scripts,
        Self::Symlinks,
        Self::Encrypted,
        Self::Templates,
    ];

    const fn name(self) -> &'static str {
        match self {
            Self::Dirs => "dirs",
            Self::Files => "files",
            Self::Remove => "remove",
            Self::Scripts => "scripts",
            Self::Symlinks => "symlinks",
            Self::Encrypted => "encrypted",
            Self::Templates => "templates",
        }
    }
}

/// A set of entry types, parsed from `dirs,files,...` lists.
///
/// `all` and `none` are accepted, and a `no` prefix removes a type
/// (`all,noscripts`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTypeSet(BTreeSet<EntryType>);

impl EntryTypeSet {
    /// Every type.
    #[must_use]
    pub fn all() -> Self {
        Self(EntryType::ALL.into_iter().collect())
    }

    /// No type.
    #[must_use]
    pub const fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// Return `true` if `ty` is in the set.
    #[must_use]
    pub fn contains(&self, ty: EntryType) -> bool {
        self.0.contains(&ty)
    }

    /// Types in either set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Return `true` if `entry` passes this include set and `exclude` set.
    ///
    /// Encrypted and template sources must also pass the `encrypted` and
    /// `templates` checks.
    #[must_use]
    pub fn includes(&self, exclude: &Self, entry: &SourceEntry) -> bool {
        let passes = |ty| self.contains(ty) && !exclude.contains(ty);
        if !passes(entry.entry_type()) {
            return false;
        }
        if let SourceEntry::File { attr, .. } = entry {
            if attr.encrypted && !passes(EntryType::Encrypted) {
                return false;
            }
            if attr.template && !passes(EntryType::Templates) {
                return false;
            }
        }
        true
    }
}

impl Default for EntryTypeSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for EntryTypeSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = BTreeSet::new();
        for word in s.split(',').map(str::trim).filter(|w| !w.is_empty()) {
            match word {
                "all" => set.extend(EntryType::ALL),
                "none" => set.clear(),
                _ => {
                    let (remove, name) = word
                        .strip_prefix("no")
                        .filter(|rest| EntryType::ALL.iter().any(|t| t.name() == *rest))
                        .map_or((false, word), |rest| (true, rest));
                    let ty = EntryType::ALL
                        .into_iter()
                        .find(|t| t.name() == name)
                        .ok_or_else(|| format!("unknown entry type '{word}'"))?;
                    if remove {
                        set.remove(&ty);
                    } else {
                        set.insert(ty);
                    }
                }
            }
        }
        Ok(Self(set))
    }
}

impl fmt::Display for EntryTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|t| t.name()).collect();
        write!(f, "{}", names.join(","))
    }
}
