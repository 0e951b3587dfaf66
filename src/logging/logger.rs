//! Structured logger with dry-run awareness and summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::types::{Log, Outcome, TargetRecord};
use super::utils::log_file_path;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Structured logger with dry-run awareness and summary collection.
///
/// Every message also reaches `$XDG_CACHE_HOME/dotstate/<command>.log`
/// through the file layer installed by
/// [`init_subscriber`](super::subscriber::init_subscriber).
#[derive(Debug)]
pub struct Logger {
    records: Mutex<Vec<TargetRecord>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger for `command`.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Return the log file path, if available.
    #[must_use]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded outcomes.
    #[must_use]
    pub fn records(&self) -> Vec<TargetRecord> {
        self.records.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: "dotstate::stage", "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless `--debug`).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: "dotstate::dry_run", "{msg}");
    }

    /// Record a target outcome for the summary.
    pub fn record(&self, target: &str, outcome: Outcome, message: Option<&str>) {
        tracing::debug!(target: "dotstate::outcome", "{target}: {}", outcome.label());
        if let Ok(mut guard) = self.records.lock() {
            guard.push(TargetRecord {
                target: target.to_string(),
                outcome,
                message: message.map(String::from),
            });
        }
    }

    /// Count the recorded failures.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.records.lock().map_or(0, |guard| {
            guard
                .iter()
                .filter(|r| r.outcome == Outcome::Failed)
                .count()
        })
    }

    /// Log a one-line summary of recorded outcomes, listing failures and
    /// skips individually.
    pub fn print_summary(&self) {
        let records = self.records();
        if records.is_empty() {
            return;
        }
        let count = |o: Outcome| records.iter().filter(|r| r.outcome == o).count();
        for record in records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed | Outcome::Skipped))
        {
            let suffix = record
                .message
                .as_ref()
                .map_or_else(String::new, |m| format!(" ({m})"));
            self.debug(&format!("{} {}{suffix}", record.outcome.label(), record.target));
        }
        self.info(&format!(
            "{} targets: {} applied, {} unchanged, {} skipped, {} dry-run, {} failed",
            records.len(),
            count(Outcome::Applied),
            count(Outcome::Unchanged),
            count(Outcome::Skipped),
            count(Outcome::DryRun),
            count(Outcome::Failed),
        ));
        if let Some(path) = &self.log_file {
            self.debug(&format!("log: {}", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record(&self, target: &str, outcome: Outcome, message: Option<&str>) {
        self.record(target, outcome, message);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::fs;

    use super::*;
    use crate::logging::isolated_logger;

    #[test]
    fn records_start_empty() {
        let (log, _tmp, _guard) = isolated_logger();
        assert!(log.records().is_empty());
    }

    #[test]
    fn record_with_message() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record(".bashrc", Outcome::Skipped, Some("conflict"));
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, ".bashrc");
        assert_eq!(records[0].message.as_deref(), Some("conflict"));
    }

    #[test]
    fn failure_count_counts_failures_only() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record("a", Outcome::Applied, None);
        log.record("b", Outcome::Failed, Some("boom"));
        log.record("c", Outcome::Failed, None);
        log.record("d", Outcome::Unchanged, None);
        assert_eq!(log.failure_count(), 2);
    }

    #[test]
    fn trait_delegates_to_logger() {
        let (log, _tmp, _guard) = isolated_logger();
        let log_ref: &dyn Log = &log;
        log_ref.record("via-trait", Outcome::Applied, None);
        assert_eq!(log.records().len(), 1);
    }

    #[test]
    fn messages_reach_log_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("marker-{}", std::process::id());
        log.stage(&format!("stage {marker}"));
        log.warn(&format!("warn {marker}"));
        log.dry_run(&format!("dry {marker}"));
        log.debug(&format!("debug {marker}"));
        let contents = fs::read_to_string(log.log_path().unwrap()).unwrap();
        assert!(contents.contains(&format!("==> stage {marker}")), "{contents}");
        assert!(contents.contains(&format!("[warn] warn {marker}")), "{contents}");
        assert!(contents.contains(&format!("[dry run] dry {marker}")), "{contents}");
        assert!(contents.contains(&format!("[debug] debug {marker}")), "{contents}");
    }

    #[test]
    fn summary_counts_outcomes() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record("a", Outcome::Applied, None);
        log.record("b", Outcome::Failed, Some("boom"));
        log.print_summary();
        let contents = fs::read_to_string(log.log_path().unwrap()).unwrap();
        assert!(
            contents.contains("2 targets: 1 applied, 0 unchanged, 0 skipped, 0 dry-run, 1 failed"),
            "{contents}"
        );
        assert!(contents.contains("failed b (boom)"), "{contents}");
    }
}
