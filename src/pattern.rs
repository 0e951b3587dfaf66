//! Glob include/exclude sets used for ignore and remove markers.
//!
//! A path is matched when it matches at least one include pattern and no
//! exclude pattern. Unmatched paths answer `false`, which means "kept" for an
//! ignore set and "left alone" for a remove set.

use glob::{MatchOptions, Pattern};

use crate::error::PatternError;

/// Slash-separated globbing: `*` never crosses a directory boundary and a
/// leading dot needs no literal match.
pub const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A set of include and exclude glob patterns over target-relative paths.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl PatternSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one pattern.
    ///
    /// # Errors
    ///
    /// Returns [`glob::PatternError`] if the pattern is not a valid glob.
    pub fn add(&mut self, pattern: &str, include: bool) -> Result<(), glob::PatternError> {
        let compiled = Pattern::new(pattern)?;
        if include {
            self.includes.push(compiled);
        } else {
            self.excludes.push(compiled);
        }
        Ok(())
    }

    /// Parse a pattern file and add its patterns, each prefixed with `dir`
    /// (the target-relative directory the file lives in).
    ///
    /// Blank lines and lines starting with `#` are skipped; a leading `!`
    /// turns the line into an exclude.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::Invalid`] naming the first bad line.
    pub fn parse(&mut self, file: &str, contents: &str, dir: &str) -> Result<(), PatternError> {
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (include, pattern) = line
                .strip_prefix('!')
                .map_or((true, line), |rest| (false, rest.trim_start()));
            let pattern = pattern.trim_start_matches('/');
            let full = if dir.is_empty() {
                pattern.to_string()
            } else {
                format!("{dir}/{pattern}")
            };
            self.add(&full, include)
                .map_err(|e| PatternError::Invalid {
                    file: file.to_string(),
                    line: idx + 1,
                    pattern: line.to_string(),
                    message: e.msg.to_string(),
                })?;
        }
        Ok(())
    }

    /// Return `true` if `path` matches an include and no exclude.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.includes
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
            && !self
                .excludes
                .iter()
                .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }

    /// Include patterns as written.
    pub fn include_patterns(&self) -> impl Iterator<Item = &str> {
        self.includes.iter().map(Pattern::as_str)
    }

    /// Return `true` if no include pattern was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty()
    }
}
