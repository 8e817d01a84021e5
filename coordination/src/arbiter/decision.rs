//! The arbiter's single authoritative output per round.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classify::DecisionKey;
use crate::session::{ReportId, Role, RoundNumber};

/// Why a round could not produce an actionable decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadlockCause {
    /// Nothing came back at all.
    NoReports,
    /// Fewer reports than the quorum requires.
    InsufficientReports { got: usize, need: usize },
    /// Every report was a dissent (malformed, wrong role, agent failure).
    NoValidVotes,
    /// The leading key did not reach the agreement threshold.
    LowAgreement { ratio: f64, threshold: f64 },
}

impl fmt::Display for DeadlockCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReports => write!(f, "no reports received"),
            Self::InsufficientReports { got, need } => {
                write!(f, "{} reports received, quorum is {}", got, need)
            }
            Self::NoValidVotes => write!(f, "no valid votes"),
            Self::LowAgreement { ratio, threshold } => {
                write!(f, "agreement {:.2} below threshold {:.2}", ratio, threshold)
            }
        }
    }
}

/// Result of arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArbitrationOutcome {
    Agreed { key: DecisionKey },
    Deadlock { cause: DeadlockCause },
}

/// Vote count for one decision key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    pub key: DecisionKey,
    pub votes: usize,
    /// Earliest `produced_at` among the reports voting for this key.
    pub earliest_at: DateTime<Utc>,
    pub report_ids: Vec<ReportId>,
}

/// The arbiter's single decision for a dispatch round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDecision {
    pub round: RoundNumber,
    pub role: Role,
    pub outcome: ArbitrationOutcome,
    /// Report whose key won; `None` on deadlock.
    pub chosen_report_ref: Option<ReportId>,
    /// |largest group| / |reports received|.
    pub agreement_ratio: f64,
    /// The chosen report's intended next step.
    pub next_action: String,
    pub total_reports: usize,
    /// Tallies ordered by rank (winner or leading key first).
    pub tallies: Vec<VoteTally>,
    /// Reports that could not vote.
    pub dissenting: Vec<ReportId>,
}

impl CanonicalDecision {
    pub fn is_deadlock(&self) -> bool {
        matches!(self.outcome, ArbitrationOutcome::Deadlock { .. })
    }

    /// Winning key, if the round agreed.
    pub fn key(&self) -> Option<&DecisionKey> {
        match &self.outcome {
            ArbitrationOutcome::Agreed { key } => Some(key),
            ArbitrationOutcome::Deadlock { .. } => None,
        }
    }

    /// The decision tag used in logs and transition reasons.
    pub fn label(&self) -> String {
        match &self.outcome {
            ArbitrationOutcome::Agreed { key } => key.to_string(),
            ArbitrationOutcome::Deadlock { .. } => "arbitration-deadlock".to_string(),
        }
    }
}
