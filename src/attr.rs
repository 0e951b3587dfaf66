//! Attribute codec: maps a source path segment to a target name plus
//! attributes, and back.
//!
//! Prefixes are consumed left to right in a fixed order, so a name is only
//! valid when its prefixes appear in canonical order:
//!
//! ```text
//! directory: [exact_] [private_] [readonly_] [literal_|dot_] name
//! file:      [encrypted_] [private_] [readonly_] [empty_] [executable_] [literal_|dot_] name [.literal] [.tmpl]
//! create:    create_ [encrypted_] [private_] [readonly_] [executable_] ...
//! modify:    modify_ [private_] [readonly_] [executable_] ...
//! script:    run_ [once_] [before_|after_] [NNN_] ...
//! symlink:   symlink_ ...
//! remove:    remove_ [literal_|dot_] name
//! ```
//!
//! A name that still starts with a known attribute prefix after decoding is
//! rejected; targets that genuinely start with one are encoded with
//! `literal_`.

use crate::error::AttrError;

/// Suffix marking a template source file.
pub const TEMPLATE_SUFFIX: &str = ".tmpl";
/// Suffix that stops suffix parsing.
pub const LITERAL_SUFFIX: &str = ".literal";

const AFTER: &str = "after_";
const BEFORE: &str = "before_";
const CREATE: &str = "create_";
const DOT: &str = "dot_";
const EMPTY: &str = "empty_";
const ENCRYPTED: &str = "encrypted_";
const EXACT: &str = "exact_";
const EXECUTABLE: &str = "executable_";
const LITERAL: &str = "literal_";
const MODIFY: &str = "modify_";
const ONCE: &str = "once_";
const PRIVATE: &str = "private_";
const READONLY: &str = "readonly_";
const REMOVE: &str = "remove_";
const RUN: &str = "run_";
const SYMLINK: &str = "symlink_";

/// Every prefix with a meaning somewhere in the grammar.
const KNOWN_PREFIXES: [&str; 16] = [
    AFTER, BEFORE, CREATE, DOT, EMPTY, ENCRYPTED, EXACT, EXECUTABLE, LITERAL, MODIFY, ONCE,
    PRIVATE, READONLY, REMOVE, RUN, SYMLINK,
];

/// What a source file turns into in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SourceFileKind {
    /// Regular file whose contents are fully managed.
    #[default]
    File,
    /// File created only when missing; contents of an existing file are kept.
    Create,
    /// Program that receives the current contents on stdin and prints new ones.
    Modify,
    /// Script executed during apply.
    Script,
    /// Symbolic link whose target is the file contents.
    Symlink,
    /// Marker requesting removal of the target.
    Remove,
}

/// Phase in which a script runs relative to the other entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ScriptPhase {
    /// Before any other entry is updated.
    Before,
    /// Interleaved with entries in path order.
    #[default]
    During,
    /// After every other entry is updated.
    After,
}

/// Position of a script in the run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScriptOrder {
    /// Run phase.
    pub phase: ScriptPhase,
    /// Optional three-digit rank within the phase.
    pub rank: Option<u16>,
}

impl ScriptOrder {
    /// Sort key for scripts within the same phase; unranked scripts sort as
    /// rank zero and ties are broken by the caller on target path.
    #[must_use]
    pub fn sort_key(&self) -> (ScriptPhase, u16) {
        (self.phase, self.rank.unwrap_or(0))
    }
}

/// Attributes decoded from a source directory name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirAttr {
    /// Name of the directory in the destination.
    pub target_name: String,
    /// Remove destination children that are not managed.
    pub exact: bool,
    /// Strip group and other permission bits.
    pub private: bool,
    /// Strip write permission bits.
    pub readonly: bool,
}

impl DirAttr {
    /// Decode a source directory name.
    ///
    /// # Errors
    ///
    /// Returns [`AttrError`] if the name has prefixes out of order or decodes
    /// to an invalid target name.
    pub fn decode(source_name: &str) -> Result<Self, AttrError> {
        let mut name = source_name;
        let exact = take(&mut name, EXACT);
        let private = take(&mut name, PRIVATE);
        let readonly = take(&mut name, READONLY);
        let target_name = decode_base(source_name, name)?;
        Ok(Self {
            target_name,
            exact,
            private,
            readonly,
        })
    }

    /// Encode back into a source directory name.
    #[must_use]
    pub fn source_name(&self) -> String {
        let mut out = String::new();
        push_if(&mut out, self.exact, EXACT);
        push_if(&mut out, self.private, PRIVATE);
        push_if(&mut out, self.readonly, READONLY);
        out.push_str(&encode_base(&self.target_name));
        out
    }

    /// Permission bits for the directory under `umask`.
    #[must_use]
    pub const fn perm(&self, umask: u32) -> u32 {
        let mut perm = 0o777;
        if self.private {
            perm &= !0o077;
        }
        if self.readonly {
            perm &= !0o222;
        }
        perm & !umask
    }
}

/// Attributes decoded from a source file name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileAttr {
    /// Name of the entry in the destination.
    pub target_name: String,
    /// Entry kind.
    pub kind: SourceFileKind,
    /// Keep the file even when its contents are empty.
    pub empty: bool,
    /// Contents are encrypted and must be decrypted before use.
    pub encrypted: bool,
    /// Set execute bits.
    pub executable: bool,
    /// Run the script at most once per distinct contents.
    pub once: bool,
    /// Script order.
    pub order: ScriptOrder,
    /// Strip group and other permission bits.
    pub private: bool,
    /// Strip write permission bits.
    pub readonly: bool,
    /// Contents are a template.
    pub template: bool,
}

impl FileAttr {
    /// Create attributes for `target_name` with every flag cleared.
    #[must_use]
    pub fn new(kind: SourceFileKind, target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            kind,
            ..Self::default()
        }
    }

    /// Decode a source file name.
    ///
    /// # Errors
    ///
    /// Returns [`AttrError`] if the name has prefixes out of order, uses a
    /// prefix that does not apply to its kind, or decodes to an invalid
    /// target name.
    pub fn decode(source_name: &str) -> Result<Self, AttrError> {
        let mut name = source_name;
        let mut attr = Self::default();

        if take(&mut name, CREATE) {
            attr.kind = SourceFileKind::Create;
            attr.encrypted = take(&mut name, ENCRYPTED);
            attr.private = take(&mut name, PRIVATE);
            attr.readonly = take(&mut name, READONLY);
            attr.executable = take(&mut name, EXECUTABLE);
        } else if take(&mut name, MODIFY) {
            attr.kind = SourceFileKind::Modify;
            attr.private = take(&mut name, PRIVATE);
            attr.readonly = take(&mut name, READONLY);
            attr.executable = take(&mut name, EXECUTABLE);
        } else if take(&mut name, REMOVE) {
            attr.kind = SourceFileKind::Remove;
        } else if take(&mut name, RUN) {
            attr.kind = SourceFileKind::Script;
            attr.once = take(&mut name, ONCE);
            if take(&mut name, BEFORE) {
                attr.order.phase = ScriptPhase::Before;
            } else if take(&mut name, AFTER) {
                attr.order.phase = ScriptPhase::After;
            }
            attr.order.rank = take_rank(&mut name);
        } else if take(&mut name, SYMLINK) {
            attr.kind = SourceFileKind::Symlink;
        } else {
            attr.encrypted = take(&mut name, ENCRYPTED);
            attr.private = take(&mut name, PRIVATE);
            attr.readonly = take(&mut name, READONLY);
            attr.empty = take(&mut name, EMPTY);
            attr.executable = take(&mut name, EXECUTABLE);
        }

        if attr.kind != SourceFileKind::Remove {
            if let Some(rest) = name.strip_suffix(LITERAL_SUFFIX) {
                name = rest;
            } else if let Some(rest) = name.strip_suffix(TEMPLATE_SUFFIX) {
                attr.template = true;
                name = rest.strip_suffix(LITERAL_SUFFIX).unwrap_or(rest);
            }
        }

        attr.target_name = decode_base(source_name, name)?;
        Ok(attr)
    }

    /// Encode back into a source file name.
    #[must_use]
    pub fn source_name(&self) -> String {
        let mut out = String::new();
        match self.kind {
            SourceFileKind::File => {
                push_if(&mut out, self.encrypted, ENCRYPTED);
                push_if(&mut out, self.private, PRIVATE);
                push_if(&mut out, self.readonly, READONLY);
                push_if(&mut out, self.empty, EMPTY);
                push_if(&mut out, self.executable, EXECUTABLE);
            }
            SourceFileKind::Create => {
                out.push_str(CREATE);
                push_if(&mut out, self.encrypted, ENCRYPTED);
                push_if(&mut out, self.private, PRIVATE);
                push_if(&mut out, self.readonly, READONLY);
                push_if(&mut out, self.executable, EXECUTABLE);
            }
            SourceFileKind::Modify => {
                out.push_str(MODIFY);
                push_if(&mut out, self.private, PRIVATE);
                push_if(&mut out, self.readonly, READONLY);
                push_if(&mut out, self.executable, EXECUTABLE);
            }
            SourceFileKind::Script => {
                out.push_str(RUN);
                push_if(&mut out, self.once, ONCE);
                match self.order.phase {
                    ScriptPhase::Before => out.push_str(BEFORE),
                    ScriptPhase::During => {}
                    ScriptPhase::After => out.push_str(AFTER),
                }
                if let Some(rank) = self.order.rank {
                    out.push_str(&format!("{rank:03}_"));
                }
            }
            SourceFileKind::Symlink => out.push_str(SYMLINK),
            SourceFileKind::Remove => {
                out.push_str(REMOVE);
                out.push_str(&encode_base(&self.target_name));
                return out;
            }
        }

        let base = encode_base(&self.target_name);
        let needs_literal = self.kind == SourceFileKind::Script
            && !base.starts_with(LITERAL)
            && !base.starts_with(DOT)
            && has_rank(&base);
        if needs_literal {
            out.push_str(LITERAL);
        }
        out.push_str(&base);
        if self.target_name.ends_with(TEMPLATE_SUFFIX) || self.target_name.ends_with(LITERAL_SUFFIX)
        {
            out.push_str(LITERAL_SUFFIX);
        }
        if self.template {
            out.push_str(TEMPLATE_SUFFIX);
        }
        out
    }

    /// Permission bits for the materialized file under `umask`.
    #[must_use]
    pub const fn perm(&self, umask: u32) -> u32 {
        let mut perm = 0o666;
        if self.executable {
            perm |= 0o111;
        }
        if self.private {
            perm &= !0o077;
        }
        if self.readonly {
            perm &= !0o222;
        }
        perm & !umask
    }
}

/// Consume `prefix` from the front of `name` if present.
fn take(name: &mut &str, prefix: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some(rest) => {
            *name = rest;
            true
        }
        None => false,
    }
}

/// Consume a `NNN_` rank.
fn take_rank(name: &mut &str) -> Option<u16> {
    if !has_rank(name) {
        return None;
    }
    let rank = name.get(..3)?.parse().ok()?;
    *name = name.get(4..)?;
    Some(rank)
}

fn has_rank(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > 4
        && bytes.iter().take(3).all(u8::is_ascii_digit)
        && bytes.get(3) == Some(&b'_')
}

fn push_if(out: &mut String, cond: bool, prefix: &str) {
    if cond {
        out.push_str(prefix);
    }
}

/// Decode the `literal_`/`dot_` part and validate the resulting name.
fn decode_base(segment: &str, name: &str) -> Result<String, AttrError> {
    let decoded = if let Some(rest) = name.strip_prefix(LITERAL) {
        rest.to_string()
    } else if let Some(rest) = name.strip_prefix(DOT) {
        format!(".{rest}")
    } else {
        if let Some(prefix) = KNOWN_PREFIXES.iter().find(|p| name.starts_with(**p)) {
            return Err(AttrError::UnexpectedPrefix {
                segment: segment.to_string(),
                prefix: (*prefix).to_string(),
            });
        }
        name.to_string()
    };

    if decoded.is_empty() {
        return Err(AttrError::EmptyName {
            segment: segment.to_string(),
        });
    }
    if decoded == "." || decoded == ".." || decoded.contains('/') || decoded.contains('\\') {
        return Err(AttrError::InvalidName {
            segment: segment.to_string(),
            name: decoded,
        });
    }
    Ok(decoded)
}

fn encode_base(target_name: &str) -> String {
    if let Some(rest) = target_name.strip_prefix('.') {
        format!("{DOT}{rest}")
    } else if KNOWN_PREFIXES.iter().any(|p| target_name.starts_with(p)) {
        format!("{LITERAL}{target_name}")
    } else {
        target_name.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Directories
    // -----------------------------------------------------------------------

    #[test]
    fn dir_private_dot() {
        let attr = DirAttr::decode("private_dot_ssh").unwrap();
        assert_eq!(attr.target_name, ".ssh");
        assert!(attr.private);
        assert!(!attr.exact);
        assert_eq!(attr.perm(0o022), 0o700);
    }

    #[test]
    fn dir_exact_and_readonly() {
        let attr = DirAttr::decode("exact_readonly_dot_config").unwrap();
        assert_eq!(attr.target_name, ".config");
        assert!(attr.exact && attr.readonly);
        assert_eq!(attr.perm(0o022), 0o555);
        assert_eq!(attr.source_name(), "exact_readonly_dot_config");
    }

    #[test]
    fn dir_out_of_order_prefix_is_error() {
        let err = DirAttr::decode("private_exact_foo").unwrap_err();
        assert_eq!(
            err,
            AttrError::UnexpectedPrefix {
                segment: "private_exact_foo".to_string(),
                prefix: "exact_".to_string(),
            }
        );
    }

    #[test]
    fn dir_literal_escapes_prefix() {
        let attr = DirAttr::decode("literal_run_stuff").unwrap();
        assert_eq!(attr.target_name, "run_stuff");
        assert_eq!(attr.source_name(), "literal_run_stuff");
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    #[test]
    fn file_plain_dotfile() {
        let attr = FileAttr::decode("dot_bashrc").unwrap();
        assert_eq!(attr.target_name, ".bashrc");
        assert_eq!(attr.kind, SourceFileKind::File);
        assert_eq!(attr.perm(0o022), 0o644);
    }

    #[test]
    fn file_all_file_attributes() {
        let attr = FileAttr::decode("encrypted_private_readonly_empty_executable_dot_x.tmpl")
            .unwrap();
        assert!(attr.encrypted && attr.private && attr.readonly && attr.empty);
        assert!(attr.executable && attr.template);
        assert_eq!(attr.target_name, ".x");
        assert_eq!(attr.perm(0o022), 0o500);
    }

    #[test]
    fn file_executable_is_0755() {
        let attr = FileAttr::decode("executable_dot_local_bin_tool").unwrap();
        assert_eq!(attr.perm(0o022), 0o755);
    }

    #[test]
    fn exact_on_file_is_error() {
        let err = FileAttr::decode("exact_foo").unwrap_err();
        assert!(matches!(err, AttrError::UnexpectedPrefix { prefix, .. } if prefix == "exact_"));
    }

    #[test]
    fn empty_after_dot_is_error() {
        assert_eq!(
            FileAttr::decode("dot_").unwrap_err(),
            AttrError::EmptyName {
                segment: "dot_".to_string()
            }
        );
        assert!(FileAttr::decode("private_").is_err());
    }

    #[test]
    fn literal_suffix_keeps_tmpl_in_name() {
        let attr = FileAttr::decode("notes.tmpl.literal").unwrap();
        assert_eq!(attr.target_name, "notes.tmpl");
        assert!(!attr.template);

        let attr = FileAttr::decode("notes.tmpl.literal.tmpl").unwrap();
        assert_eq!(attr.target_name, "notes.tmpl");
        assert!(attr.template);
    }

    #[test]
    fn create_and_modify_kinds() {
        let attr = FileAttr::decode("create_private_dot_netrc").unwrap();
        assert_eq!(attr.kind, SourceFileKind::Create);
        assert!(attr.private);

        let attr = FileAttr::decode("modify_executable_dot_profile").unwrap();
        assert_eq!(attr.kind, SourceFileKind::Modify);
        assert!(attr.executable);
    }

    #[test]
    fn modify_rejects_encrypted() {
        assert!(FileAttr::decode("modify_encrypted_x").is_err());
    }

    #[test]
    fn symlink_and_remove_kinds() {
        let attr = FileAttr::decode("symlink_dot_vimrc.tmpl").unwrap();
        assert_eq!(attr.kind, SourceFileKind::Symlink);
        assert!(attr.template);
        assert_eq!(attr.target_name, ".vimrc");

        let attr = FileAttr::decode("remove_dot_old.tmpl").unwrap();
        assert_eq!(attr.kind, SourceFileKind::Remove);
        assert_eq!(attr.target_name, ".old.tmpl");
        assert!(!attr.template);
    }

    // -----------------------------------------------------------------------
    // Scripts
    // -----------------------------------------------------------------------

    #[test]
    fn script_once_before_ranked() {
        let attr = FileAttr::decode("run_once_before_010_install.sh").unwrap();
        assert_eq!(attr.kind, SourceFileKind::Script);
        assert!(attr.once);
        assert_eq!(
            attr.order,
            ScriptOrder {
                phase: ScriptPhase::Before,
                rank: Some(10),
            }
        );
        assert_eq!(attr.target_name, "install.sh");
        assert_eq!(attr.source_name(), "run_once_before_010_install.sh");
    }

    #[test]
    fn script_plain_is_during() {
        let attr = FileAttr::decode("run_setup.sh").unwrap();
        assert_eq!(attr.order.phase, ScriptPhase::During);
        assert_eq!(attr.order.rank, None);
        assert!(!attr.once);
    }

    #[test]
    fn script_rank_shaped_name_uses_literal() {
        let attr = FileAttr {
            target_name: "123_x.sh".to_string(),
            ..FileAttr::new(SourceFileKind::Script, "")
        };
        let encoded = attr.source_name();
        assert_eq!(encoded, "run_literal_123_x.sh");
        assert_eq!(FileAttr::decode(&encoded).unwrap(), attr);
    }

    #[test]
    fn script_order_sorts_by_phase_then_rank() {
        let a = ScriptOrder {
            phase: ScriptPhase::Before,
            rank: Some(20),
        };
        let b = ScriptOrder {
            phase: ScriptPhase::During,
            rank: Some(1),
        };
        let c = ScriptOrder {
            phase: ScriptPhase::Before,
            rank: None,
        };
        let mut all = [b, a, c];
        all.sort_by_key(ScriptOrder::sort_key);
        assert_eq!(all, [c, a, b]);
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[test]
    fn targets_with_reserved_prefixes_round_trip() {
        for name in ["run_me", "dot_not_hidden", ".hidden", "exact_x", "plain", "a.tmpl"] {
            for kind in [
                SourceFileKind::File,
                SourceFileKind::Script,
                SourceFileKind::Symlink,
                SourceFileKind::Remove,
            ] {
                let attr = FileAttr::new(kind, name);
                let encoded = attr.source_name();
                assert_eq!(
                    FileAttr::decode(&encoded).unwrap(),
                    attr,
                    "round trip of {name} as {kind:?} via {encoded}"
                );
            }
            let dir = DirAttr {
                target_name: name.to_string(),
                ..DirAttr::default()
            };
            assert_eq!(DirAttr::decode(&dir.source_name()).unwrap(), dir);
        }
    }

    #[test]
    fn canonical_names_re_encode_identically() {
        for source in [
            "private_dot_ssh",
            "encrypted_private_dot_netrc.tmpl",
            "create_executable_bin",
            "run_once_after_bootstrap.sh.tmpl",
            "symlink_dot_zshrc",
            "remove_dot_legacy",
            "literal_dot_thing",
        ] {
            assert_eq!(FileAttr::decode(source).unwrap().source_name(), source);
        }
    }
}
