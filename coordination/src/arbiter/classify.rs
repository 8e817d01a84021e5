//! Maps raw agent output to normalized decision keys.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::session::{AgentReport, ReportResult, Role};

/// A normalized decision key such as `root-cause:resource-leak`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionKey(String);

impl DecisionKey {
    /// Parse and normalize a raw decision string.
    ///
    /// Lowercases, collapses runs of whitespace/underscores to `-` and trims
    /// each segment. Returns `None` unless the result has the form
    /// `namespace:detail` with both parts non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        let (namespace, detail) = lowered.split_once(':')?;
        let namespace = normalize_segment(namespace);
        let detail = detail
            .split(':')
            .map(normalize_segment)
            .collect::<Vec<_>>()
            .join(":");
        if namespace.is_empty() || detail.is_empty() || detail.split(':').any(str::is_empty) {
            return None;
        }
        Some(Self(format!("{}:{}", namespace, detail)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map(|(ns, _)| ns).unwrap_or(&self.0)
    }

    pub fn detail(&self) -> &str {
        self.0.split_once(':').map(|(_, d)| d).unwrap_or("")
    }
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs of whitespace or underscores inside a key segment.
static SEPARATOR_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_]+").expect("SEPARATOR_RUN regex should compile"));

fn normalize_segment(segment: &str) -> String {
    SEPARATOR_RUN
        .replace_all(segment.trim(), "-")
        .trim_matches('-')
        .to_string()
}

/// Namespace a role is allowed to vote in.
pub fn namespace_for(role: Role) -> &'static str {
    match role {
        Role::Coordinator => "dispatch",
        Role::Analyst => "root-cause",
        Role::Patcher => "patch",
        Role::Verifier => "verification",
    }
}

/// How a single report participates in arbitration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A valid vote for this key.
    Vote(DecisionKey),
    /// Counted in the denominator, can never win.
    Dissent(DissentKind),
}

/// Why a report could not be counted as a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DissentKind {
    /// Decision string did not parse into `namespace:detail`.
    Malformed,
    /// Report came back under a different role than was dispatched.
    WrongRole,
    /// The agent reported a failure instead of a decision.
    AgentFailed,
}

impl fmt::Display for DissentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::WrongRole => write!(f, "wrong_role"),
            Self::AgentFailed => write!(f, "agent_failed"),
        }
    }
}

/// Classify a report for a round dispatched to `role`.
///
/// Keys from a foreign namespace still count as votes here; whether they are
/// actionable in the current state is the controller's call.
pub fn classify(report: &AgentReport, role: Role) -> Classification {
    if report.role != role {
        return Classification::Dissent(DissentKind::WrongRole);
    }
    match &report.result {
        ReportResult::Failed { .. } => Classification::Dissent(DissentKind::AgentFailed),
        ReportResult::Outcome { decision, .. } => match DecisionKey::parse(decision) {
            Some(key) => Classification::Vote(key),
            None => Classification::Dissent(DissentKind::Malformed),
        },
    }
}
