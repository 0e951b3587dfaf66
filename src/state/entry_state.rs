//! The recorded shape of a target after it was last written.
use serde::{Deserialize, Serialize};

/// Lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for b in &digest {
        // write! to a String is infallible; unwrap_or(()) makes that explicit.
        write!(hex, "{b:02x}").unwrap_or(());
    }
    hex
}

/// Kind of recorded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Directory.
    Dir,
    /// Regular file.
    File,
    /// Symbolic link.
    Symlink,
    /// Absent.
    Remove,
    /// Script.
    Script,
}

/// Type, permissions and content hash of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryState {
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Permission bits, for files and directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Hex SHA-256 of the contents (link target for symlinks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Link target, kept for symlinks so status output can show it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

impl EntryState {
    /// A directory with `perm`.
    #[must_use]
    pub const fn dir(perm: u32) -> Self {
        Self {
            kind: EntryKind::Dir,
            mode: Some(perm),
            content_hash: None,
            contents: None,
        }
    }

    /// A regular file.
    #[must_use]
    pub fn file(contents: &[u8], perm: u32) -> Self {
        Self {
            kind: EntryKind::File,
            mode: Some(perm),
            content_hash: Some(sha256_hex(contents)),
            contents: None,
        }
    }

    /// A symlink to `target`.
    #[must_use]
    pub fn symlink(target: &str) -> Self {
        Self {
            kind: EntryKind::Symlink,
            mode: None,
            content_hash: Some(sha256_hex(target.as_bytes())),
            contents: Some(target.to_string()),
        }
    }

    /// An absent entry.
    #[must_use]
    pub const fn remove() -> Self {
        Self {
            kind: EntryKind::Remove,
            mode: None,
            content_hash: None,
            contents: None,
        }
    }

    /// A script with `contents`.
    #[must_use]
    pub fn script(contents: &[u8]) -> Self {
        Self {
            kind: EntryKind::Script,
            mode: None,
            content_hash: Some(sha256_hex(contents)),
            contents: None,
        }
    }

    /// Return `true` if this entry describes an absent path.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.kind == EntryKind::Remove
    }
}

/// Compare two optional entry states, treating `None` and a remove entry as
/// the same thing.
///
/// Directories compare by mode; symlinks by target; files by mode and hash.
#[must_use]
pub fn equivalent(a: Option<&EntryState>, b: Option<&EntryState>) -> bool {
    let a = a.filter(|s| !s.is_absent());
    let b = b.filter(|s| !s.is_absent());
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.kind == b.kind
                && match a.kind {
                    EntryKind::Dir => a.mode == b.mode,
                    EntryKind::Symlink | EntryKind::Script => a.content_hash == b.content_hash,
                    EntryKind::File | EntryKind::Remove => {
                        a.mode == b.mode && a.content_hash == b.content_hash
                    }
                }
        }
        _ => false,
    }
}
