//! The append-only audit log for one defect.
//!
//! The record never stores a mutable "current state". The current state and
//! iteration count are folds over the transition history, so replaying a
//! restored record reproduces the live session exactly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::types::{
    AgentReport, DefectReference, EscalationReason, EscalationRecord, RepairState, ReportId,
    Role, RoundNumber, SessionId, Transition, TransitionCause,
};
use crate::arbiter::CanonicalDecision;

/// Default retry ceiling observed in production audit trails.
pub const DEFAULT_MAX_ITERATIONS: u32 = 15;

/// Errors raised when the record refuses a write.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("max_iterations must be positive")]
    InvalidCeiling,

    #[error("Session {session_id} is terminal ({state}); no further writes accepted")]
    Terminal {
        session_id: SessionId,
        state: RepairState,
    },

    #[error("Transition starts at {claimed} but session is in {actual}")]
    StateMismatch {
        claimed: RepairState,
        actual: RepairState,
    },

    #[error("Illegal transition: {from} → {to} ({cause})")]
    IllegalTransition {
        from: RepairState,
        to: RepairState,
        cause: TransitionCause,
    },

    #[error("Iteration {got} invalid after {previous} (expected {expected}, ceiling {max})")]
    InvalidIteration {
        previous: u32,
        got: u32,
        expected: u32,
        max: u32,
    },

    #[error("Timestamp regression: {got} precedes {previous}")]
    TimestampRegression {
        previous: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    #[error("Round {got} out of order (last sealed round {last})")]
    RoundOutOfOrder { last: RoundNumber, got: RoundNumber },

    #[error("Escalation record inconsistent with history: {0}")]
    EscalationMismatch(String),

    #[error("Malformed session export: {0}")]
    Malformed(String),
}

/// Result type for session record operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Legal edges of the repair state machine.
///
/// ```text
/// WAIT    → ANALYZE (dispatched) | VERIFY (cached patch reused) | WAIT (failure to progress)
/// ANALYZE → PATCH (root cause)   | WAIT (loop-back)
/// PATCH   → VERIFY (candidate)   | WAIT (loop-back)
/// VERIFY  → RESOLVED (passed)    | WAIT (loop-back)
/// any non-terminal → ESCALATED
/// ```
pub fn is_legal_transition(from: RepairState, to: RepairState, cause: TransitionCause) -> bool {
    use RepairState::*;
    use TransitionCause as C;

    if from.is_terminal() {
        return false;
    }

    if to == Escalated {
        return matches!(
            cause,
            C::IterationCeilingExceeded | C::UnrecoverableError | C::ArbitrationDeadlock
        );
    }

    match (from, to) {
        (Wait, Analyze) => cause == C::Dispatched,
        (Wait, Verify) => cause == C::CachedPatchReused,
        (Wait, Wait) => matches!(cause, C::ArbitrationDeadlock | C::InvalidDecision),
        (Analyze, Patch) => cause == C::RootCauseIdentified,
        (Analyze, Wait) => matches!(
            cause,
            C::NoActionableCause | C::ArbitrationDeadlock | C::InvalidDecision
        ),
        (Patch, Verify) => cause == C::PatchProduced,
        (Patch, Wait) => matches!(
            cause,
            C::PatchFailed | C::ArbitrationDeadlock | C::InvalidDecision
        ),
        (Verify, Resolved) => cause == C::VerificationPassed,
        (Verify, Wait) => matches!(
            cause,
            C::VerificationFailed | C::ArbitrationDeadlock | C::InvalidDecision
        ),
        _ => false,
    }
}

/// A transition the controller wants to apply. The record fills in
/// `from_state` and `timestamp`.
#[derive(Debug, Clone)]
pub struct TransitionDraft {
    pub to: RepairState,
    pub trigger_role: Role,
    pub canonical_report_ref: Option<ReportId>,
    pub cause: TransitionCause,
    pub reason: String,
    pub iteration: u32,
    pub round: RoundNumber,
}

/// One sealed dispatch round: who was asked, what came back, what was decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRound {
    pub round: RoundNumber,
    pub iteration: u32,
    pub state: RepairState,
    pub role: Role,
    /// Names of the agents that were invoked.
    pub dispatched: Vec<String>,
    /// Reports received before the round was sealed.
    pub reports: Vec<AgentReport>,
    /// Agents that never answered within the role timeout.
    pub timed_out: Vec<String>,
    pub decision: CanonicalDecision,
    pub sealed_at: DateTime<Utc>,
}

/// Append-only audit log of a single defect's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    id: SessionId,
    defect: DefectReference,
    max_iterations: u32,
    created_at: DateTime<Utc>,
    history: Vec<Transition>,
    rounds: Vec<DispatchRound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    escalation: Option<EscalationRecord>,
    #[serde(default)]
    stale_reports_discarded: u32,
}

impl SessionRecord {
    /// Create a fresh session in `WAIT` with an empty history.
    pub fn create(defect: DefectReference, max_iterations: u32) -> SessionResult<Self> {
        if max_iterations == 0 {
            return Err(SessionError::InvalidCeiling);
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            defect,
            max_iterations,
            created_at: Utc::now(),
            history: Vec::new(),
            rounds: Vec::new(),
            escalation: None,
            stale_reports_discarded: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn defect(&self) -> &DefectReference {
        &self.defect
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current state: `to_state` of the last transition, or `WAIT`.
    pub fn state(&self) -> RepairState {
        self.history
            .last()
            .map(|t| t.to_state)
            .unwrap_or(RepairState::Wait)
    }

    /// Current iteration count, folded from the history.
    pub fn iteration_count(&self) -> u32 {
        self.history.last().map(|t| t.iteration).unwrap_or(0)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn rounds(&self) -> &[DispatchRound] {
        &self.rounds
    }

    pub fn escalation(&self) -> Option<&EscalationRecord> {
        self.escalation.as_ref()
    }

    pub fn stale_reports_discarded(&self) -> u32 {
        self.stale_reports_discarded
    }

    /// Number of the last sealed round (0 before any dispatch).
    pub fn last_round(&self) -> RoundNumber {
        self.rounds.last().map(|r| r.round).unwrap_or(0)
    }

    /// Every recorded report, grouped by the iteration it was collected in.
    pub fn reports_by_iteration(&self) -> BTreeMap<u32, Vec<AgentReport>> {
        let mut out: BTreeMap<u32, Vec<AgentReport>> = BTreeMap::new();
        for round in &self.rounds {
            out.entry(round.iteration)
                .or_default()
                .extend(round.reports.iter().cloned());
        }
        out
    }

    /// Reports collected so far in the current iteration.
    pub fn current_iteration_reports(&self) -> Vec<AgentReport> {
        let iteration = self.iteration_count();
        self.rounds
            .iter()
            .filter(|r| r.iteration == iteration)
            .flat_map(|r| r.reports.iter().cloned())
            .collect()
    }

    /// All canonical decisions in round order.
    pub fn decisions(&self) -> Vec<CanonicalDecision> {
        self.rounds.iter().map(|r| r.decision.clone()).collect()
    }

    /// Patch candidate that may be re-verified without re-patching.
    ///
    /// The canonical report of the latest PATCH → VERIFY transition, unless a
    /// later verification actually failed it.
    pub fn reusable_patch(&self) -> Option<&ReportId> {
        for t in self.history.iter().rev() {
            match t.cause {
                TransitionCause::VerificationFailed => return None,
                TransitionCause::PatchProduced => return t.canonical_report_ref.as_ref(),
                _ => {}
            }
        }
        None
    }

    /// Consecutive deadlocked loop-backs at the tail of the history.
    ///
    /// Forward dispatch transitions out of `WAIT` do not break the streak;
    /// any other productive transition does.
    pub fn deadlock_streak(&self) -> u32 {
        let mut streak = 0;
        for t in self.history.iter().rev() {
            match t.cause {
                TransitionCause::Dispatched | TransitionCause::CachedPatchReused => continue,
                TransitionCause::ArbitrationDeadlock => streak += 1,
                _ => break,
            }
        }
        streak
    }

    /// Seal a dispatch round into the record.
    pub fn record_round(&mut self, round: DispatchRound) -> SessionResult<()> {
        self.ensure_open()?;
        if round.round <= self.last_round() {
            return Err(SessionError::RoundOutOfOrder {
                last: self.last_round(),
                got: round.round,
            });
        }
        debug!(
            session_id = %self.id,
            round = round.round,
            role = %round.role,
            reports = round.reports.len(),
            "Round sealed"
        );
        self.rounds.push(round);
        Ok(())
    }

    /// Count a late report that arrived after its round was sealed.
    pub fn note_stale_report(&mut self) {
        self.stale_reports_discarded += 1;
    }

    /// Append a non-escalation transition.
    pub fn append(&mut self, draft: TransitionDraft) -> SessionResult<&Transition> {
        if draft.to == RepairState::Escalated {
            return Err(SessionError::EscalationMismatch(
                "use escalate() to enter ESCALATED".to_string(),
            ));
        }
        self.push(draft)
    }

    /// Append the terminal escalation transition and its escalation record.
    pub fn escalate(
        &mut self,
        reason: EscalationReason,
        trigger_role: Role,
        iteration: u32,
        round: RoundNumber,
        detail: impl Into<String>,
    ) -> SessionResult<EscalationRecord> {
        let detail = detail.into();
        let escalated_from = self.state();
        let timestamp = self
            .push(TransitionDraft {
                to: RepairState::Escalated,
                trigger_role,
                canonical_report_ref: None,
                cause: reason.cause(),
                reason: format!("{}: {}", reason, detail),
                iteration,
                round,
            })?
            .timestamp;
        let record = EscalationRecord {
            session_id: self.id.clone(),
            reason,
            iteration_at_escalation: iteration,
            escalated_from,
            detail,
            timestamp,
        };
        self.escalation = Some(record.clone());
        Ok(record)
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.is_terminal() {
            return Err(SessionError::Terminal {
                session_id: self.id.clone(),
                state: self.state(),
            });
        }
        Ok(())
    }

    fn push(&mut self, draft: TransitionDraft) -> SessionResult<&Transition> {
        self.ensure_open()?;

        // Clamp to keep the history non-decreasing even if the clock steps back.
        let now = Utc::now();
        let timestamp = match self.history.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let transition = Transition {
            timestamp,
            from_state: self.state(),
            to_state: draft.to,
            trigger_role: draft.trigger_role,
            canonical_report_ref: draft.canonical_report_ref,
            cause: draft.cause,
            reason: draft.reason,
            iteration: draft.iteration,
            round: draft.round,
        };

        validate_step(self.history.last(), self.max_iterations, &transition)?;

        debug!(
            session_id = %self.id,
            from = %transition.from_state,
            to = %transition.to_state,
            iteration = transition.iteration,
            "State transition"
        );

        let index = self.history.len();
        self.history.push(transition);
        Ok(&self.history[index])
    }

    /// Re-check every invariant by replaying the history from scratch.
    ///
    /// Used when a record is restored from its serialized form.
    pub fn validate(&self) -> SessionResult<()> {
        if self.max_iterations == 0 {
            return Err(SessionError::InvalidCeiling);
        }

        let mut previous: Option<&Transition> = None;
        for (i, t) in self.history.iter().enumerate() {
            if previous.map(|p| p.to_state.is_terminal()).unwrap_or(false) {
                return Err(SessionError::Malformed(format!(
                    "transition {} follows a terminal state",
                    i
                )));
            }
            validate_step(previous, self.max_iterations, t)?;
            previous = Some(t);
        }

        let mut last_round = 0;
        for r in &self.rounds {
            if r.round <= last_round {
                return Err(SessionError::RoundOutOfOrder {
                    last: last_round,
                    got: r.round,
                });
            }
            last_round = r.round;
        }

        match (self.state(), &self.escalation) {
            (RepairState::Escalated, None) => Err(SessionError::EscalationMismatch(
                "escalated session without escalation record".to_string(),
            )),
            (RepairState::Escalated, Some(e)) => self.check_escalation(e),
            (_, Some(_)) => Err(SessionError::EscalationMismatch(
                "escalation record on open session".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }

    fn check_escalation(&self, e: &EscalationRecord) -> SessionResult<()> {
        if e.session_id != self.id {
            return Err(SessionError::EscalationMismatch(format!(
                "record belongs to session {}, not {}",
                e.session_id, self.id
            )));
        }
        if e.iteration_at_escalation != self.iteration_count() {
            return Err(SessionError::EscalationMismatch(format!(
                "record says iteration {}, history says {}",
                e.iteration_at_escalation,
                self.iteration_count()
            )));
        }
        let cause = self.history.last().map(|t| t.cause);
        if cause != Some(e.reason.cause()) {
            return Err(SessionError::EscalationMismatch(format!(
                "reason {} does not match final transition cause {:?}",
                e.reason, cause
            )));
        }
        Ok(())
    }

    /// One-line rendering of the state path for logs.
    pub fn summary(&self) -> String {
        let mut path = vec![RepairState::Wait.to_string()];
        path.extend(self.history.iter().map(|t| t.to_state.to_string()));
        format!(
            "session={} state={} iter={}/{} rounds={} [{}]",
            self.id,
            self.state(),
            self.iteration_count(),
            self.max_iterations,
            self.rounds.len(),
            path.join(" → ")
        )
    }
}

/// Validate `next` against the transition before it.
fn validate_step(
    previous: Option<&Transition>,
    max_iterations: u32,
    next: &Transition,
) -> SessionResult<()> {
    let (state, iteration) = previous
        .map(|p| (p.to_state, p.iteration))
        .unwrap_or((RepairState::Wait, 0));

    if next.from_state != state {
        return Err(SessionError::StateMismatch {
            claimed: next.from_state,
            actual: state,
        });
    }

    if !is_legal_transition(next.from_state, next.to_state, next.cause) {
        return Err(SessionError::IllegalTransition {
            from: next.from_state,
            to: next.to_state,
            cause: next.cause,
        });
    }

    if let Some(p) = previous {
        if next.timestamp < p.timestamp {
            return Err(SessionError::TimestampRegression {
                previous: p.timestamp,
                got: next.timestamp,
            });
        }
    }

    let ceiling_breach = next.cause == TransitionCause::IterationCeilingExceeded;
    let expected = if next.cause.is_loop_back() || ceiling_breach {
        iteration + 1
    } else {
        iteration
    };
    let within_ceiling = if ceiling_breach {
        expected == max_iterations + 1
    } else {
        expected <= max_iterations
    };

    if next.iteration != expected || !within_ceiling {
        return Err(SessionError::InvalidIteration {
            previous: iteration,
            got: next.iteration,
            expected,
            max: max_iterations,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defect() -> DefectReference {
        DefectReference::new("BUG-1", "fd leak")
    }

    fn draft(to: RepairState, cause: TransitionCause, iteration: u32) -> TransitionDraft {
        TransitionDraft {
            to,
            trigger_role: Role::Coordinator,
            canonical_report_ref: None,
            cause,
            reason: cause.to_string(),
            iteration,
            round: 0,
        }
    }

    #[test]
    fn test_create_rejects_zero_ceiling() {
        assert_eq!(
            SessionRecord::create(defect(), 0).unwrap_err(),
            SessionError::InvalidCeiling
        );
    }

    #[test]
    fn test_new_session_starts_in_wait() {
        let record = SessionRecord::create(defect(), DEFAULT_MAX_ITERATIONS).unwrap();
        assert_eq!(record.state(), RepairState::Wait);
        assert_eq!(record.iteration_count(), 0);
        assert!(record.history().is_empty());
    }

    #[test]
    fn test_state_is_fold_over_history() {
        let mut record = SessionRecord::create(defect(), 3).unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 0))
            .unwrap();
        record
            .append(draft(RepairState::Wait, TransitionCause::NoActionableCause, 1))
            .unwrap();
        assert_eq!(record.state(), RepairState::Wait);
        assert_eq!(record.iteration_count(), 1);
        assert_eq!(record.history().len(), 2);
    }

    #[test]
    fn test_illegal_edge_rejected() {
        let mut record = SessionRecord::create(defect(), 3).unwrap();
        let err = record
            .append(draft(RepairState::Resolved, TransitionCause::VerificationPassed, 0))
            .unwrap_err();
        assert!(matches!(err, SessionError::IllegalTransition { .. }));
        assert!(record.history().is_empty());
    }

    #[test]
    fn test_loop_back_must_increment_iteration() {
        let mut record = SessionRecord::create(defect(), 3).unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 0))
            .unwrap();
        let err = record
            .append(draft(RepairState::Wait, TransitionCause::NoActionableCause, 0))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidIteration { expected: 1, .. }));
    }

    #[test]
    fn test_loop_back_cannot_cross_ceiling() {
        let mut record = SessionRecord::create(defect(), 1).unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 0))
            .unwrap();
        record
            .append(draft(RepairState::Wait, TransitionCause::NoActionableCause, 1))
            .unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 1))
            .unwrap();
        let err = record
            .append(draft(RepairState::Wait, TransitionCause::NoActionableCause, 2))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidIteration { max: 1, .. }));
    }

    #[test]
    fn test_escalation_is_terminal() {
        let mut record = SessionRecord::create(defect(), 2).unwrap();
        let esc = record
            .escalate(
                EscalationReason::UnrecoverableError,
                Role::Analyst,
                0,
                1,
                "no analysts",
            )
            .unwrap();
        assert_eq!(esc.iteration_at_escalation, 0);
        assert_eq!(esc.escalated_from, RepairState::Wait);
        assert_eq!(record.state(), RepairState::Escalated);
        assert_eq!(Some(esc.timestamp), record.history().last().map(|t| t.timestamp));
        assert_eq!(record.escalation(), Some(&esc));

        let err = record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 0))
            .unwrap_err();
        assert!(matches!(err, SessionError::Terminal { .. }));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_ceiling_escalation_commits_attempted_iteration() {
        let mut record = SessionRecord::create(defect(), 1).unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 0))
            .unwrap();
        record
            .append(draft(RepairState::Wait, TransitionCause::ArbitrationDeadlock, 1))
            .unwrap();
        let esc = record
            .escalate(
                EscalationReason::IterationCeilingExceeded,
                Role::Coordinator,
                2,
                0,
                "ceiling",
            )
            .unwrap();
        assert_eq!(esc.iteration_at_escalation, 2);
        assert_eq!(record.iteration_count(), 2);
    }

    #[test]
    fn test_append_refuses_escalated_target() {
        let mut record = SessionRecord::create(defect(), 2).unwrap();
        let err = record
            .append(draft(
                RepairState::Escalated,
                TransitionCause::UnrecoverableError,
                0,
            ))
            .unwrap_err();
        assert!(matches!(err, SessionError::EscalationMismatch(_)));
    }

    #[test]
    fn test_deadlock_streak_skips_dispatches() {
        let mut record = SessionRecord::create(defect(), 5).unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 0))
            .unwrap();
        record
            .append(draft(RepairState::Wait, TransitionCause::ArbitrationDeadlock, 1))
            .unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 1))
            .unwrap();
        record
            .append(draft(RepairState::Wait, TransitionCause::ArbitrationDeadlock, 2))
            .unwrap();
        assert_eq!(record.deadlock_streak(), 2);

        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 2))
            .unwrap();
        record
            .append(draft(RepairState::Patch, TransitionCause::RootCauseIdentified, 2))
            .unwrap();
        assert_eq!(record.deadlock_streak(), 0);
    }

    #[test]
    fn test_reusable_patch_cleared_by_failed_verification() {
        let mut record = SessionRecord::create(defect(), 5).unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 0))
            .unwrap();
        record
            .append(draft(RepairState::Patch, TransitionCause::RootCauseIdentified, 0))
            .unwrap();
        let mut produced = draft(RepairState::Verify, TransitionCause::PatchProduced, 0);
        produced.canonical_report_ref = Some("patch-1".to_string());
        record.append(produced).unwrap();
        assert_eq!(record.reusable_patch().map(String::as_str), Some("patch-1"));

        record
            .append(draft(RepairState::Wait, TransitionCause::ArbitrationDeadlock, 1))
            .unwrap();
        assert_eq!(record.reusable_patch().map(String::as_str), Some("patch-1"));

        record
            .append(draft(RepairState::Verify, TransitionCause::CachedPatchReused, 1))
            .unwrap();
        record
            .append(draft(RepairState::Wait, TransitionCause::VerificationFailed, 2))
            .unwrap();
        assert!(record.reusable_patch().is_none());
    }

    #[test]
    fn test_summary_renders_path() {
        let mut record = SessionRecord::create(defect(), 5).unwrap();
        record
            .append(draft(RepairState::Analyze, TransitionCause::Dispatched, 0))
            .unwrap();
        let summary = record.summary();
        assert!(summary.contains("WAIT → ANALYZE"));
        assert!(summary.contains("iter=0/5"));
    }
}
