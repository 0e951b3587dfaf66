//! Two-column status letters in the style of `git status --short`.
use crate::state::{EntryState, equivalent};

/// Letter describing the change from `old` to `new`.
#[must_use]
pub fn letter(old: Option<&EntryState>, new: Option<&EntryState>) -> char {
    let old = old.filter(|s| !s.is_absent());
    let new = new.filter(|s| !s.is_absent());
    if equivalent(old, new) {
        return ' ';
    }
    match (old, new) {
        (None, Some(_)) => 'A',
        (Some(_), None) => 'D',
        _ => 'M',
    }
}

/// One line of `status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Last written versus actual.
    pub first: char,
    /// Actual versus target.
    pub second: char,
    /// Target-relative path.
    pub target: String,
}

impl StatusLine {
    /// Return `true` when both columns are blank.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.first == ' ' && self.second == ' '
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{} {}", self.first, self.second, self.target)
    }
}
