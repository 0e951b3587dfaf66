//! Core logging types: per-target outcomes and the [`Log`] trait.

/// Outcome of one target for summary reporting.
#[derive(Debug, Clone)]
pub struct TargetRecord {
    /// Target-relative path.
    pub target: String,
    /// What happened to it.
    pub outcome: Outcome,
    /// Optional detail (skip reason or error description).
    pub message: Option<String>,
}

/// What happened to a target during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The destination was changed or the script ran.
    Applied,
    /// The destination already matched.
    Unchanged,
    /// The target was skipped at a conflict prompt or by a once marker.
    Skipped,
    /// The destination would have been changed.
    DryRun,
    /// Applying the target failed.
    Failed,
}

impl Outcome {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::DryRun => "dry-run",
            Self::Failed => "failed",
        }
    }
}

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) is the production implementation; the
/// apply engine only sees this trait.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a target outcome for the summary.
    fn record(&self, target: &str, outcome: Outcome, message: Option<&str>);
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels_are_distinct() {
        let labels = [
            Outcome::Applied,
            Outcome::Unchanged,
            Outcome::Skipped,
            Outcome::DryRun,
            Outcome::Failed,
        ]
        .map(Outcome::label);
        let unique: std::collections::BTreeSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
