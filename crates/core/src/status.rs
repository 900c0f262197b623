//! Analysis lifecycle status and its transition table.
//!
//! Each variant's discriminant is the integer code persisted in the
//! `analyses.status` column.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status code type matching SMALLINT in the database.
pub type StatusCode = i16;

/// Lifecycle status of an analysis.
///
/// ```text
/// Pending ──> Running ──> Finished | Error | Canceled | TimedOut
///    └──────> Canceled | Error
/// ```
///
/// The four right-hand states are terminal and absorbing.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Reserved for "lookup failed". Never stored on a record.
    NotExists = -1,
    Pending = 0,
    Running = 1,
    Finished = 2,
    Error = 3,
    Canceled = 4,
    TimedOut = 5,
}

impl AnalysisStatus {
    /// All statuses an analysis record can actually hold.
    pub const RECORDED: [AnalysisStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Finished,
        Self::Error,
        Self::Canceled,
        Self::TimedOut,
    ];

    /// Return the database status code.
    pub fn code(self) -> StatusCode {
        self as StatusCode
    }

    /// Parse a database status code.
    pub fn from_code(code: StatusCode) -> Option<Self> {
        match code {
            -1 => Some(Self::NotExists),
            0 => Some(Self::Pending),
            1 => Some(Self::Running),
            2 => Some(Self::Finished),
            3 => Some(Self::Error),
            4 => Some(Self::Canceled),
            5 => Some(Self::TimedOut),
            _ => None,
        }
    }

    /// Whether no further transition may happen from this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Error | Self::Canceled | Self::TimedOut
        )
    }

    /// Whether the analysis is still queued or executing.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Canceled)
                | (Pending, Error)
                | (Running, Finished)
                | (Running, Error)
                | (Running, Canceled)
                | (Running, TimedOut)
        )
    }

    /// Human-readable label shown to users and in notification e-mails.
    pub fn label(self) -> &'static str {
        match self {
            Self::NotExists => "Not exists",
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Finished => "Finished",
            Self::Error => "Error",
            Self::Canceled => "Canceled",
            Self::TimedOut => "Timeout",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<AnalysisStatus> for StatusCode {
    fn from(value: AnalysisStatus) -> Self {
        value as StatusCode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for status in AnalysisStatus::RECORDED {
            assert_eq!(AnalysisStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(AnalysisStatus::from_code(-1), Some(AnalysisStatus::NotExists));
        assert_eq!(AnalysisStatus::from_code(42), None);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for from in AnalysisStatus::RECORDED.into_iter().filter(|s| s.is_terminal()) {
            for to in AnalysisStatus::RECORDED {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn running_reaches_every_terminal_state() {
        for to in AnalysisStatus::RECORDED.into_iter().filter(|s| s.is_terminal()) {
            assert!(AnalysisStatus::Running.can_transition_to(to));
        }
    }

    #[test]
    fn pending_cannot_finish_or_time_out() {
        assert!(!AnalysisStatus::Pending.can_transition_to(AnalysisStatus::Finished));
        assert!(!AnalysisStatus::Pending.can_transition_to(AnalysisStatus::TimedOut));
        assert!(AnalysisStatus::Pending.can_transition_to(AnalysisStatus::Canceled));
    }

    #[test]
    fn nothing_transitions_into_not_exists_or_pending() {
        for from in AnalysisStatus::RECORDED {
            assert!(!from.can_transition_to(AnalysisStatus::NotExists));
            assert!(!from.can_transition_to(AnalysisStatus::Pending));
        }
    }

    #[test]
    fn timed_out_label_matches_legacy_wording() {
        assert_eq!(AnalysisStatus::TimedOut.to_string(), "Timeout");
    }
}
