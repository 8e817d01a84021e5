//! Event types for repair-session coordination
//!
//! Every event is session-scoped; observers subscribe through the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{
    EscalationReason, RepairState, ReportId, Role, RoundNumber, SessionId, TransitionCause,
};

/// All repair coordination events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairEvent {
    /// A session was opened for a defect
    SessionCreated {
        session_id: SessionId,
        defect_id: String,
        max_iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// Agents of one role were invoked
    RoundDispatched {
        session_id: SessionId,
        round: RoundNumber,
        role: Role,
        state: RepairState,
        agents: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A report arrived inside its round's window
    ReportReceived {
        session_id: SessionId,
        round: RoundNumber,
        report_id: ReportId,
        agent: String,
        decision: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An agent missed its response window
    AgentTimedOut {
        session_id: SessionId,
        round: RoundNumber,
        agent: String,
        timeout_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A report for an earlier round arrived late and was ignored
    StaleReportDiscarded {
        session_id: SessionId,
        current_round: RoundNumber,
        report_round: RoundNumber,
        agent: String,
        timestamp: DateTime<Utc>,
    },

    /// The arbiter produced its canonical decision
    DecisionReached {
        session_id: SessionId,
        round: RoundNumber,
        role: Role,
        decision: String,
        agreement_ratio: f64,
        chosen_report_ref: Option<ReportId>,
        timestamp: DateTime<Utc>,
    },

    /// A transition was appended to the session record
    TransitionApplied {
        session_id: SessionId,
        from_state: RepairState,
        to_state: RepairState,
        cause: TransitionCause,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },

    /// Verification passed; the session is closed
    SessionResolved {
        session_id: SessionId,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// The session was handed to a human
    SessionEscalated {
        session_id: SessionId,
        reason: EscalationReason,
        iteration: u32,
        escalated_from: RepairState,
        timestamp: DateTime<Utc>,
    },
}

impl RepairEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RepairEvent::SessionCreated { timestamp, .. }
            | RepairEvent::RoundDispatched { timestamp, .. }
            | RepairEvent::ReportReceived { timestamp, .. }
            | RepairEvent::AgentTimedOut { timestamp, .. }
            | RepairEvent::StaleReportDiscarded { timestamp, .. }
            | RepairEvent::DecisionReached { timestamp, .. }
            | RepairEvent::TransitionApplied { timestamp, .. }
            | RepairEvent::SessionResolved { timestamp, .. }
            | RepairEvent::SessionEscalated { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            RepairEvent::SessionCreated { .. } => "session_created",
            RepairEvent::RoundDispatched { .. } => "round_dispatched",
            RepairEvent::ReportReceived { .. } => "report_received",
            RepairEvent::AgentTimedOut { .. } => "agent_timed_out",
            RepairEvent::StaleReportDiscarded { .. } => "stale_report_discarded",
            RepairEvent::DecisionReached { .. } => "decision_reached",
            RepairEvent::TransitionApplied { .. } => "transition_applied",
            RepairEvent::SessionResolved { .. } => "session_resolved",
            RepairEvent::SessionEscalated { .. } => "session_escalated",
        }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            RepairEvent::SessionCreated { session_id, .. }
            | RepairEvent::RoundDispatched { session_id, .. }
            | RepairEvent::ReportReceived { session_id, .. }
            | RepairEvent::AgentTimedOut { session_id, .. }
            | RepairEvent::StaleReportDiscarded { session_id, .. }
            | RepairEvent::DecisionReached { session_id, .. }
            | RepairEvent::TransitionApplied { session_id, .. }
            | RepairEvent::SessionResolved { session_id, .. }
            | RepairEvent::SessionEscalated { session_id, .. } => session_id,
        }
    }

    /// Whether this event closes its session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RepairEvent::SessionResolved { .. } | RepairEvent::SessionEscalated { .. }
        )
    }
}
