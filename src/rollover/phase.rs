//! Rollover Phase Decision
//!
//! Maps a zone's policy, markers and keys onto exactly one lifecycle phase.
//! No I/O happens here; the engine acts on the result.
//!
//! ```text
//! Uninitialized ──baseline──▶ Stable ──interval elapsed, 1 active key──▶ EligibleForInitiation
//!                               ▲                                              │ new key created
//!                               │                                              ▼
//!                               └──────── complete ◀── ReadyToComplete ◀── InHold
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

use super::{PolicyParameters, RolloverMetadata, SigningKey};

/// Lifecycle phase of one zone for the current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No baseline marker stored yet
    Uninitialized,
    /// Idle; interval not elapsed or zone not in single-active-key state
    Stable,
    /// Interval elapsed with exactly one active key
    EligibleForInitiation,
    /// New key published, waiting for DS propagation
    InHold { age_days: i64, hold_days: i64 },
    /// Hold period elapsed
    ReadyToComplete { age_days: i64, hold_days: i64 },
}

impl Phase {
    /// Decide the phase for a zone
    pub fn decide(
        policy: &PolicyParameters,
        now: DateTime<Utc>,
        metadata: &RolloverMetadata,
        keys: &[SigningKey],
    ) -> Phase {
        let baseline = match metadata.baseline_date {
            Some(date) => date,
            None => return Phase::Uninitialized,
        };

        if let Some(started) = metadata.rollover_start {
            let hold_days = metadata
                .hold_override_days
                .unwrap_or(policy.hold_period_days);
            let age_days = whole_days_since(started, now);

            return if age_days >= hold_days {
                Phase::ReadyToComplete { age_days, hold_days }
            } else {
                Phase::InHold { age_days, hold_days }
            };
        }

        let since_days = whole_days_between(baseline, now.date_naive());
        let active_count = keys.iter().filter(|k| k.active).count();

        if since_days >= policy.rollover_interval_days && active_count == 1 {
            Phase::EligibleForInitiation
        } else {
            Phase::Stable
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Stable => "stable",
            Phase::EligibleForInitiation => "eligible",
            Phase::InHold { .. } => "hold",
            Phase::ReadyToComplete { .. } => "ready-to-complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::InHold { age_days, hold_days } => {
                write!(f, "{} ({}/{} days)", self.name(), age_days, hold_days)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Whole days elapsed between two instants, truncated toward zero
pub fn whole_days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days()
}

/// Calendar days from `from` to `to`
pub fn whole_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}
