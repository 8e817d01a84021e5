//! Session record: append-only audit log of one defect's repair lifecycle.
//!
//! - **types**: states, roles, agent reports, transitions, escalation records
//! - **record**: the log itself, legal-edge validation, folds over history
//! - **export**: read-only audit export and JSON restore

pub mod export;
pub mod record;
pub mod types;

pub use export::{SessionExport, TransitionEntry};
pub use record::{
    is_legal_transition, DispatchRound, SessionError, SessionRecord, SessionResult,
    TransitionDraft, DEFAULT_MAX_ITERATIONS,
};
pub use types::{
    AgentFailure, AgentReport, DefectReference, EscalationReason, EscalationRecord, RepairState,
    ReportId, ReportResult, Role, RoundNumber, SessionId, Transition, TransitionCause,
};
