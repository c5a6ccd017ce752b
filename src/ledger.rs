//! Offense-ledger escalation (spec §4.4). A pure function over a per-user
//! offense timestamp sequence; mirrors the teacher's `WarningLevel` escalation
//! ladder in `warnings.rs`, but recomputes the action from a threshold
//! comparison on every call instead of incrementing one step at a time.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Closed enforcement-action alphabet (spec §9). Ordered so that
/// `Ban > Timeout > Warn > None` compares correctly with derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnforcementAction {
    None,
    Warn,
    Timeout,
    Ban,
}

impl EnforcementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warn => "warn",
            Self::Timeout => "timeout",
            Self::Ban => "ban",
        }
    }
}

/// Result of one `decide` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecideOutcome {
    pub offense_count: u64,
    pub action: EnforcementAction,
}

/// Prunes `offense_timestamps` by `offense_window_sec`, appends `now`, and
/// applies the strict tie-break `ban > timeout > warn > none` (spec §4.4).
pub fn decide(
    offense_timestamps: &mut VecDeque<DateTime<Utc>>,
    now: DateTime<Utc>,
    offense_window_sec: u64,
    warning_threshold: u64,
    timeout_threshold: u64,
    ban_threshold: u64,
    ban_enabled: bool,
) -> DecideOutcome {
    let cutoff = now - ChronoDuration::seconds(offense_window_sec as i64);
    while offense_timestamps.front().is_some_and(|t| *t < cutoff) {
        offense_timestamps.pop_front();
    }

    offense_timestamps.push_back(now);
    let count = offense_timestamps.len() as u64;

    let action = if ban_enabled && count >= ban_threshold {
        EnforcementAction::Ban
    } else if count >= timeout_threshold {
        EnforcementAction::Timeout
    } else if count >= warning_threshold {
        EnforcementAction::Warn
    } else {
        EnforcementAction::None
    };

    DecideOutcome { offense_count: count, action }
}
