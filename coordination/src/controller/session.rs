//! Session controller
//!
//! Drives one session from WAIT to a terminal state.
//!
//! The controller is the only writer of its session record. Each `step`
//! dispatches exactly one round (or issues one controller transition),
//! arbitrates, and appends exactly one transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::dispatch::{Dispatcher, RoundOutcome};
use super::machine::{self, Move};
use crate::agent::{AgentRegistry, SessionSnapshot};
use crate::arbiter::{ArbitrationOutcome, CanonicalDecision, ConsensusArbiter};
use crate::config::OrchestratorConfig;
use crate::escalation::{Admission, DeadlockGuard, EscalationSink, IterationGovernor};
use crate::events::{RepairEvent, SharedEventBus};
use crate::session::{
    DispatchRound, EscalationReason, RepairState, Role, RoundNumber, SessionError, SessionRecord,
    TransitionCause, TransitionDraft,
};

/// Upper bound on a single escalation hand-off.
const SINK_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the session controller
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Session record refused write: {0}")]
    Session(#[from] SessionError),
}

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Owns one session record and advances it round by round.
pub struct SessionController {
    record: SessionRecord,
    registry: Arc<AgentRegistry>,
    config: Arc<OrchestratorConfig>,
    arbiter: ConsensusArbiter,
    governor: IterationGovernor,
    deadlock_guard: DeadlockGuard,
    dispatcher: Dispatcher,
    bus: SharedEventBus,
    sink: Arc<dyn EscalationSink>,
}

impl SessionController {
    pub fn new(
        record: SessionRecord,
        registry: Arc<AgentRegistry>,
        config: Arc<OrchestratorConfig>,
        bus: SharedEventBus,
        sink: Arc<dyn EscalationSink>,
    ) -> Self {
        Self {
            arbiter: ConsensusArbiter::new(config.arbiter.clone()),
            governor: IterationGovernor::new(record.max_iterations()),
            deadlock_guard: DeadlockGuard::new(config.deadlock_escalation_threshold),
            dispatcher: Dispatcher::new(),
            record,
            registry,
            config,
            bus,
            sink,
        }
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn into_record(self) -> SessionRecord {
        self.record
    }

    pub fn session_id(&self) -> &str {
        self.record.id()
    }

    pub fn state(&self) -> RepairState {
        self.record.state()
    }

    /// Drive the session until it is RESOLVED or ESCALATED.
    ///
    /// Internal errors are folded into an `unrecoverable-error` escalation.
    /// If the record refuses even that escalation the loop stops and the
    /// last recorded state is returned, which may be non-terminal.
    pub async fn run(&mut self) -> RepairState {
        while !self.record.is_terminal() {
            if let Err(e) = self.step().await {
                error!(session_id = %self.record.id(), error = %e, "Controller step failed");
                let iteration = self.record.iteration_count();
                let round = self.record.last_round();
                if let Err(e) = self
                    .escalate(
                        EscalationReason::UnrecoverableError,
                        Role::Coordinator,
                        iteration,
                        round,
                        e.to_string(),
                    )
                    .await
                {
                    error!(session_id = %self.record.id(), error = %e, "Forced escalation failed");
                    break;
                }
            }
        }
        info!(summary = %self.record.summary(), "Session finished");
        self.record.state()
    }

    /// Advance by exactly one transition.
    pub async fn step(&mut self) -> ControllerResult<RepairState> {
        let state = self.record.state();
        let Some(role) = state.required_role() else {
            return Err(SessionError::Terminal {
                session_id: self.record.id().to_string(),
                state,
            }
            .into());
        };

        let agents = self.registry.agents_for(role).to_vec();

        if agents.is_empty() {
            if role == Role::Coordinator {
                self.apply(TransitionDraft {
                    to: RepairState::Analyze,
                    trigger_role: Role::Coordinator,
                    canonical_report_ref: None,
                    cause: TransitionCause::Dispatched,
                    reason: "controller dispatch to analysts".to_string(),
                    iteration: self.record.iteration_count(),
                    round: 0,
                })?;
            } else {
                let iteration = self.record.iteration_count();
                let round = self.record.last_round();
                self.escalate(
                    EscalationReason::UnrecoverableError,
                    role,
                    iteration,
                    round,
                    format!("no {} agents registered", role),
                )
                .await?;
            }
            return Ok(self.record.state());
        }

        let round = self.record.last_round() + 1;
        let iteration = self.record.iteration_count();
        let names: Vec<String> = agents.iter().map(|a| a.name().to_string()).collect();

        info!(
            session_id = %self.record.id(),
            round,
            role = %role,
            state = %state,
            iteration,
            agents = names.len(),
            "Dispatching round"
        );
        self.publish(RepairEvent::RoundDispatched {
            session_id: self.record.id().to_string(),
            round,
            role,
            state,
            agents: names,
            timestamp: Utc::now(),
        });

        let snapshot = SessionSnapshot::of(&self.record, round);
        let prior = self.record.current_iteration_reports();
        let window = self.config.timeouts.for_role(role);
        let outcome = self
            .dispatcher
            .run_round(round, role, &agents, snapshot, prior, window)
            .await;
        self.observe(round, &outcome, window.as_millis() as u64);

        let decision =
            self.arbiter
                .arbitrate(round, role, outcome.dispatched.len(), &outcome.reports);
        self.publish(RepairEvent::DecisionReached {
            session_id: self.record.id().to_string(),
            round,
            role,
            decision: decision.label(),
            agreement_ratio: decision.agreement_ratio,
            chosen_report_ref: decision.chosen_report_ref.clone(),
            timestamp: Utc::now(),
        });

        let cached_verify =
            self.config.allow_cached_verify && self.record.reusable_patch().is_some();
        let next = machine::resolve(state, &decision, cached_verify);
        let reason = describe(&decision, next);
        let chosen = decision.chosen_report_ref.clone();

        self.record.record_round(DispatchRound {
            round,
            iteration,
            state,
            role,
            dispatched: outcome.dispatched,
            reports: outcome.reports,
            timed_out: outcome.timed_out,
            decision,
            sealed_at: Utc::now(),
        })?;

        if next.is_loop_back() {
            self.loop_back(next, role, round, chosen, reason).await?;
        } else {
            self.apply(TransitionDraft {
                to: next.to,
                trigger_role: role,
                canonical_report_ref: chosen,
                cause: next.cause,
                reason,
                iteration,
                round,
            })?;
        }

        Ok(self.record.state())
    }

    /// Route a loop-back through the governor, then the deadlock guard.
    async fn loop_back(
        &mut self,
        next: Move,
        role: Role,
        round: RoundNumber,
        chosen: Option<String>,
        reason: String,
    ) -> ControllerResult<()> {
        match self.governor.admit(self.record.iteration_count()) {
            Admission::ForceEscalate {
                attempted_iteration,
                max_iterations,
            } => {
                self.escalate(
                    EscalationReason::IterationCeilingExceeded,
                    role,
                    attempted_iteration,
                    round,
                    format!(
                        "{} would start iteration {} of {}",
                        next.cause, attempted_iteration, max_iterations
                    ),
                )
                .await
            }
            Admission::Continue { next_iteration } => {
                let streak = self.record.deadlock_streak() + 1;
                if next.cause == TransitionCause::ArbitrationDeadlock
                    && self.deadlock_guard.should_escalate(streak)
                {
                    return self
                        .escalate(
                            EscalationReason::ArbitrationDeadlock,
                            role,
                            next_iteration,
                            round,
                            format!("{} consecutive deadlocked rounds", streak),
                        )
                        .await;
                }
                self.apply(TransitionDraft {
                    to: next.to,
                    trigger_role: role,
                    canonical_report_ref: chosen,
                    cause: next.cause,
                    reason,
                    iteration: next_iteration,
                    round,
                })
            }
        }
    }

    fn apply(&mut self, draft: TransitionDraft) -> ControllerResult<()> {
        let transition = self.record.append(draft)?.clone();

        info!(
            session_id = %self.record.id(),
            from = %transition.from_state,
            to = %transition.to_state,
            cause = %transition.cause,
            iteration = transition.iteration,
            "Transition applied"
        );
        self.publish(RepairEvent::TransitionApplied {
            session_id: self.record.id().to_string(),
            from_state: transition.from_state,
            to_state: transition.to_state,
            cause: transition.cause,
            iteration: transition.iteration,
            timestamp: transition.timestamp,
        });

        if transition.to_state == RepairState::Resolved {
            info!(session_id = %self.record.id(), iterations = transition.iteration, "Session resolved");
            self.publish(RepairEvent::SessionResolved {
                session_id: self.record.id().to_string(),
                iterations: transition.iteration,
                timestamp: transition.timestamp,
            });
        }
        Ok(())
    }

    async fn escalate(
        &mut self,
        reason: EscalationReason,
        role: Role,
        iteration: u32,
        round: RoundNumber,
        detail: String,
    ) -> ControllerResult<()> {
        let from_state = self.record.state();
        let escalation = self
            .record
            .escalate(reason, role, iteration, round, detail)?;

        warn!(
            session_id = %escalation.session_id,
            reason = %escalation.reason,
            iteration = escalation.iteration_at_escalation,
            from = %from_state,
            "Session escalated"
        );
        self.publish(RepairEvent::TransitionApplied {
            session_id: escalation.session_id.clone(),
            from_state,
            to_state: RepairState::Escalated,
            cause: reason.cause(),
            iteration,
            timestamp: escalation.timestamp,
        });
        self.publish(RepairEvent::SessionEscalated {
            session_id: escalation.session_id.clone(),
            reason,
            iteration,
            escalated_from: from_state,
            timestamp: escalation.timestamp,
        });

        match timeout(SINK_TIMEOUT, self.sink.notify(&escalation)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(session_id = %escalation.session_id, error = %e, "Escalation sink failed");
            }
            Err(_) => {
                warn!(
                    session_id = %escalation.session_id,
                    timeout_secs = SINK_TIMEOUT.as_secs(),
                    "Escalation sink timed out"
                );
            }
        }
        Ok(())
    }

    /// Count stale reports and publish per-report events for a collected round.
    fn observe(&mut self, round: RoundNumber, outcome: &RoundOutcome, timeout_ms: u64) {
        for stale in &outcome.stale {
            self.record.note_stale_report();
            debug!(
                session_id = %self.record.id(),
                current_round = round,
                report_round = stale.round,
                agent = %stale.agent,
                "Stale report discarded"
            );
            self.publish(RepairEvent::StaleReportDiscarded {
                session_id: self.record.id().to_string(),
                current_round: round,
                report_round: stale.round,
                agent: stale.agent.clone(),
                timestamp: Utc::now(),
            });
        }
        for agent in &outcome.timed_out {
            self.publish(RepairEvent::AgentTimedOut {
                session_id: self.record.id().to_string(),
                round,
                agent: agent.clone(),
                timeout_ms,
                timestamp: Utc::now(),
            });
        }
        for report in &outcome.reports {
            self.publish(RepairEvent::ReportReceived {
                session_id: self.record.id().to_string(),
                round,
                report_id: report.id.clone(),
                agent: report.agent.clone(),
                decision: report.decision().map(str::to_string),
                timestamp: report.produced_at,
            });
        }
    }

    fn publish(&self, event: RepairEvent) {
        let _ = self.bus.publish(event);
    }
}

/// Transition reason text for a decided round.
fn describe(decision: &CanonicalDecision, next: Move) -> String {
    match &decision.outcome {
        ArbitrationOutcome::Agreed { key } => format!(
            "{} ({}, agreement {:.2})",
            key, next.cause, decision.agreement_ratio
        ),
        ArbitrationOutcome::Deadlock { cause } => format!("{}: {}", decision.label(), cause),
    }
}
