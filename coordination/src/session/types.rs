//! Session vocabulary: states, roles, reports, transitions and escalation records.
//!
//! Everything in here is write-once audit data: once a value lands in a
//! [`SessionRecord`](super::SessionRecord) it is never mutated again.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier.
pub type SessionId = String;

/// Identifier of a single recorded agent report.
pub type ReportId = String;

/// Monotonic dispatch round number within one session (1-indexed).
pub type RoundNumber = u64;

/// Lifecycle states of a repair session.
///
/// Every session starts in `Wait` and terminates in either `Resolved` or
/// `Escalated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairState {
    /// Idle between attempts; the coordinator decides what to dispatch next.
    Wait,
    /// Analysts are diagnosing the defect.
    Analyze,
    /// Patchers are producing a candidate fix.
    Patch,
    /// Verifiers are checking the candidate fix.
    Verify,
    /// Defect repaired (terminal).
    Resolved,
    /// Handed off to a human (terminal).
    Escalated,
}

impl RepairState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated)
    }

    /// The agent role that serves this state, if any.
    pub fn required_role(self) -> Option<Role> {
        match self {
            Self::Wait => Some(Role::Coordinator),
            Self::Analyze => Some(Role::Analyst),
            Self::Patch => Some(Role::Patcher),
            Self::Verify => Some(Role::Verifier),
            Self::Resolved | Self::Escalated => None,
        }
    }
}

impl fmt::Display for RepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait => write!(f, "WAIT"),
            Self::Analyze => write!(f, "ANALYZE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Verify => write!(f, "VERIFY"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Escalated => write!(f, "ESCALATED"),
        }
    }
}

/// Capability category an agent fulfils.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Analyst,
    Patcher,
    Verifier,
    Coordinator,
}

impl Role {
    /// All roles, in dispatch order.
    pub const ALL: [Role; 4] = [
        Role::Coordinator,
        Role::Analyst,
        Role::Patcher,
        Role::Verifier,
    ];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyst => write!(f, "analyst"),
            Self::Patcher => write!(f, "patcher"),
            Self::Verifier => write!(f, "verifier"),
            Self::Coordinator => write!(f, "coordinator"),
        }
    }
}

/// The defect a session is trying to repair.
///
/// The engine never interprets the artifact; it is handed to agents verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DefectReference {
    /// External identifier (ticket, bug id, path).
    pub id: String,
    /// Short human-readable description.
    #[serde(default)]
    pub summary: String,
    /// Opaque artifact handed to agents (stack trace, failing test, file path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl DefectReference {
    pub fn new(id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

/// Why an agent could not produce a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailure {
    /// The agent hit an internal error and said so.
    Internal,
    /// The agent task panicked.
    Panicked,
    /// The agent could not reach its backend.
    Unavailable,
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::Panicked => write!(f, "panicked"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Payload of an agent report.
///
/// Failure is a value, not an error: a misbehaving agent produces a
/// `Failed` report and the arbiter counts it as dissent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportResult {
    /// The agent reached a decision, e.g. `root-cause:resource-leak`.
    Outcome {
        decision: String,
        #[serde(default)]
        detail: serde_json::Value,
    },
    /// The agent failed to produce a decision.
    Failed { failure: AgentFailure, message: String },
}

/// One agent invocation's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentReport {
    pub id: ReportId,
    pub role: Role,
    /// Name of the agent that produced this report.
    pub agent: String,
    /// Intended next step, free text.
    pub action: String,
    pub result: ReportResult,
    pub produced_at: DateTime<Utc>,
}

impl AgentReport {
    /// Build a decision report stamped with the current time.
    pub fn outcome(
        role: Role,
        agent: impl Into<String>,
        action: impl Into<String>,
        decision: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            agent: agent.into(),
            action: action.into(),
            result: ReportResult::Outcome {
                decision: decision.into(),
                detail: serde_json::Value::Null,
            },
            produced_at: Utc::now(),
        }
    }

    /// Build a failure report stamped with the current time.
    pub fn failed(
        role: Role,
        agent: impl Into<String>,
        failure: AgentFailure,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            agent: agent.into(),
            action: String::new(),
            result: ReportResult::Failed {
                failure,
                message: message.into(),
            },
            produced_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, value: serde_json::Value) -> Self {
        if let ReportResult::Outcome { ref mut detail, .. } = self.result {
            *detail = value;
        }
        self
    }

    pub fn with_produced_at(mut self, at: DateTime<Utc>) -> Self {
        self.produced_at = at;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// The raw decision string, if the agent produced one.
    pub fn decision(&self) -> Option<&str> {
        match &self.result {
            ReportResult::Outcome { decision, .. } => Some(decision),
            ReportResult::Failed { .. } => None,
        }
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Dispatched,
    CachedPatchReused,
    RootCauseIdentified,
    NoActionableCause,
    PatchProduced,
    PatchFailed,
    VerificationPassed,
    VerificationFailed,
    ArbitrationDeadlock,
    InvalidDecision,
    IterationCeilingExceeded,
    UnrecoverableError,
}

impl TransitionCause {
    /// Loop-back causes consume one governed iteration.
    pub fn is_loop_back(self) -> bool {
        matches!(
            self,
            Self::NoActionableCause
                | Self::PatchFailed
                | Self::VerificationFailed
                | Self::ArbitrationDeadlock
                | Self::InvalidDecision
        )
    }
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dispatched => "dispatched",
            Self::CachedPatchReused => "cached_patch_reused",
            Self::RootCauseIdentified => "root_cause_identified",
            Self::NoActionableCause => "no_actionable_cause",
            Self::PatchProduced => "patch_produced",
            Self::PatchFailed => "patch_failed",
            Self::VerificationPassed => "verification_passed",
            Self::VerificationFailed => "verification_failed",
            Self::ArbitrationDeadlock => "arbitration_deadlock",
            Self::InvalidDecision => "invalid_decision",
            Self::IterationCeilingExceeded => "iteration_ceiling_exceeded",
            Self::UnrecoverableError => "unrecoverable_error",
        };
        write!(f, "{}", s)
    }
}

/// A single recorded state transition. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    pub timestamp: DateTime<Utc>,
    pub from_state: RepairState,
    pub to_state: RepairState,
    pub trigger_role: Role,
    /// Report chosen by arbitration, when one drove this transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_report_ref: Option<ReportId>,
    pub cause: TransitionCause,
    pub reason: String,
    /// Iteration count after this transition was applied.
    pub iteration: u32,
    /// Dispatch round that produced this transition (0 for controller-issued).
    pub round: RoundNumber,
}

/// Why a session was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationReason {
    IterationCeilingExceeded,
    UnrecoverableError,
    ArbitrationDeadlock,
}

impl EscalationReason {
    pub fn cause(self) -> TransitionCause {
        match self {
            Self::IterationCeilingExceeded => TransitionCause::IterationCeilingExceeded,
            Self::UnrecoverableError => TransitionCause::UnrecoverableError,
            Self::ArbitrationDeadlock => TransitionCause::ArbitrationDeadlock,
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IterationCeilingExceeded => write!(f, "iteration-ceiling-exceeded"),
            Self::UnrecoverableError => write!(f, "unrecoverable-error"),
            Self::ArbitrationDeadlock => write!(f, "arbitration-deadlock"),
        }
    }
}

/// Terminal artifact emitted when a session escalates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EscalationRecord {
    pub session_id: SessionId,
    pub reason: EscalationReason,
    pub iteration_at_escalation: u32,
    /// State the session was in when it escalated.
    pub escalated_from: RepairState,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}
