//! Run Reporting
//!
//! Per-item and per-zone outcomes are collected as values rather than
//! short-circuiting errors; `RunSummary` folds them into the counters printed
//! at the end of an invocation.

use serde::Serialize;
use std::fmt;

use super::{Phase, Zone};

/// Result of a single external call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded,
    Failed { reason: String },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded)
    }
}

/// Outcome of one per-key call (deactivate or delete)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyOutcome {
    pub key_id: i64,
    pub outcome: ItemOutcome,
}

impl KeyOutcome {
    pub fn succeeded(key_id: i64) -> Self {
        Self {
            key_id,
            outcome: ItemOutcome::Succeeded,
        }
    }

    pub fn failed(key_id: i64, reason: impl Into<String>) -> Self {
        Self {
            key_id,
            outcome: ItemOutcome::Failed {
                reason: reason.into(),
            },
        }
    }
}

/// What the phase action did for a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Baseline marker written
    Baselined,
    /// New key requested, rollover start recorded
    Initiated { new_key_id: Option<i64> },
    /// Hold finished; superseded keys deactivated where possible
    Completed { deactivations: Vec<KeyOutcome> },
    /// Nothing to do this run
    Skipped,
    /// External or storage call failed; state left for the next run
    Failed { reason: String },
    /// Stored markers could not be parsed; decision skipped
    DataError { reason: String },
}

/// Outcome of the cleanup sweep for a zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// One entry per key whose grace period had elapsed
    pub deletions: Vec<KeyOutcome>,
    /// Keys skipped because their marker or key list could not be read
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn deleted_count(&self) -> usize {
        self.deletions.iter().filter(|d| d.outcome.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.deletions.len() - self.deleted_count() + self.errors.len()
    }
}

/// Everything that happened to one zone in an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneReport {
    pub zone: Zone,
    #[serde(skip)]
    pub phase: Option<Phase>,
    pub action: ActionOutcome,
    pub cleanup: CleanupReport,
}

/// Counters for one invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub initiated: u64,
    pub completed: u64,
    pub baselined: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub failed: u64,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a zone's outcome into the counters
    pub fn record(&mut self, report: &ZoneReport) {
        match &report.action {
            ActionOutcome::Baselined => self.baselined += 1,
            ActionOutcome::Initiated { .. } => self.initiated += 1,
            ActionOutcome::Completed { deactivations } => {
                self.completed += 1;
                self.failed += deactivations
                    .iter()
                    .filter(|d| !d.outcome.is_success())
                    .count() as u64;
            }
            ActionOutcome::Skipped => self.skipped += 1,
            ActionOutcome::Failed { .. } => self.failed += 1,
            ActionOutcome::DataError { .. } => {
                self.skipped += 1;
                self.failed += 1;
            }
        }

        self.deleted += report.cleanup.deleted_count() as u64;
        self.failed += report.cleanup.failed_count() as u64;
    }

    /// Whether any mutation was attempted or recorded
    pub fn has_changes(&self) -> bool {
        self.initiated + self.completed + self.baselined + self.deleted > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "initiated={} completed={} baselined={} skipped={} deleted={} failed={}",
            self.initiated, self.completed, self.baselined, self.skipped, self.deleted, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(action: ActionOutcome, cleanup: CleanupReport) -> ZoneReport {
        ZoneReport {
            zone: Zone::new(1, "example.com"),
            phase: None,
            action,
            cleanup,
        }
    }

    #[test]
    fn test_empty_summary_line() {
        assert_eq!(
            RunSummary::new().to_string(),
            "initiated=0 completed=0 baselined=0 skipped=0 deleted=0 failed=0"
        );
        assert!(!RunSummary::new().has_changes());
    }

    #[test]
    fn test_record_actions() {
        let mut summary = RunSummary::new();
        summary.record(&report(ActionOutcome::Baselined, CleanupReport::default()));
        summary.record(&report(
            ActionOutcome::Initiated { new_key_id: Some(4) },
            CleanupReport::default(),
        ));
        summary.record(&report(ActionOutcome::Skipped, CleanupReport::default()));
        summary.record(&report(
            ActionOutcome::Failed {
                reason: "HTTP 500".into(),
            },
            CleanupReport::default(),
        ));

        assert_eq!(summary.baselined, 1);
        assert_eq!(summary.initiated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.has_changes());
    }

    #[test]
    fn test_partial_completion_counts_failures() {
        let mut summary = RunSummary::new();
        summary.record(&report(
            ActionOutcome::Completed {
                deactivations: vec![KeyOutcome::succeeded(1), KeyOutcome::failed(2, "timeout")],
            },
            CleanupReport::default(),
        ));

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_cleanup_counts() {
        let mut summary = RunSummary::new();
        let cleanup = CleanupReport {
            deletions: vec![
                KeyOutcome::succeeded(1),
                KeyOutcome::succeeded(2),
                KeyOutcome::failed(3, "HTTP 503"),
            ],
            errors: vec!["unreadable marker for key 4".into()],
        };
        summary.record(&report(ActionOutcome::Skipped, cleanup));

        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_data_error_is_skipped_and_failed() {
        let mut summary = RunSummary::new();
        summary.record(&report(
            ActionOutcome::DataError {
                reason: "bad date".into(),
            },
            CleanupReport::default(),
        ));
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_zone_report_serializes() {
        let json = serde_json::to_value(report(
            ActionOutcome::Completed {
                deactivations: vec![KeyOutcome::failed(2, "timeout")],
            },
            CleanupReport::default(),
        ))
        .unwrap();

        assert_eq!(json["action"]["action"], "completed");
        assert_eq!(json["action"]["deactivations"][0]["outcome"]["status"], "failed");
        assert_eq!(json["zone"]["name"], "example.com");
    }
}
