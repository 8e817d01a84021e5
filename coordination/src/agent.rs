//! Repair agent abstraction and the per-role agent registry.
//!
//! Agents are external workers (analysts, patchers, verifiers, coordinators)
//! that receive a read-only snapshot of the session and return a single
//! report. They never touch the session record directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arbiter::CanonicalDecision;
use crate::session::{
    AgentFailure, AgentReport, DefectReference, RepairState, ReportId, Role, RoundNumber,
    SessionId, SessionRecord,
};

/// Errors an agent may return instead of a report
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent internal error: {0}")]
    Internal(String),

    #[error("Agent unavailable: {0}")]
    Unavailable(String),
}

impl AgentError {
    /// Failure kind recorded on the substituted report.
    pub fn failure(&self) -> AgentFailure {
        match self {
            Self::Internal(_) => AgentFailure::Internal,
            Self::Unavailable(_) => AgentFailure::Unavailable,
        }
    }
}

/// Read-only view of a session handed to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub defect: DefectReference,
    pub state: RepairState,
    pub iteration_count: u32,
    pub max_iterations: u32,
    /// Round being dispatched.
    pub round: RoundNumber,
    /// Canonical decisions of every earlier round.
    pub prior_decisions: Vec<CanonicalDecision>,
    /// Patch eligible for cached re-verification.
    pub reusable_patch: Option<ReportId>,
}

impl SessionSnapshot {
    pub fn of(record: &SessionRecord, round: RoundNumber) -> Self {
        Self {
            session_id: record.id().to_string(),
            defect: record.defect().clone(),
            state: record.state(),
            iteration_count: record.iteration_count(),
            max_iterations: record.max_iterations(),
            round,
            prior_decisions: record.decisions(),
            reusable_patch: record.reusable_patch().cloned(),
        }
    }
}

/// Trait for repair agents
#[async_trait]
pub trait RepairAgent: Send + Sync {
    /// Unique, stable agent name
    fn name(&self) -> &str;

    /// Role this agent serves
    fn role(&self) -> Role;

    /// Produce one report for the given snapshot.
    ///
    /// `prior` holds the reports already collected in the current iteration,
    /// so a patcher sees the analysts' output and a verifier the patchers'.
    async fn invoke(
        &self,
        snapshot: &SessionSnapshot,
        prior: &[AgentReport],
    ) -> Result<AgentReport, AgentError>;
}

/// Shared handle to an agent
pub type SharedAgent = Arc<dyn RepairAgent>;

/// Agents grouped by role, in registration order.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<Role, Vec<SharedAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own role
    pub fn register(&mut self, agent: SharedAgent) -> &mut Self {
        self.agents.entry(agent.role()).or_default().push(agent);
        self
    }

    /// Builder-style registration
    pub fn with(mut self, agent: SharedAgent) -> Self {
        self.register(agent);
        self
    }

    pub fn agents_for(&self, role: Role) -> &[SharedAgent] {
        self.agents.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_role(&self, role: Role) -> bool {
        !self.agents_for(role).is_empty()
    }

    /// Roles other than coordinator that have no agents.
    pub fn missing_roles(&self) -> Vec<Role> {
        [Role::Analyst, Role::Patcher, Role::Verifier]
            .into_iter()
            .filter(|role| !self.has_role(*role))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (role, agents) in &self.agents {
            let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
            map.entry(role, &names);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: String,
        role: Role,
    }

    #[async_trait]
    impl RepairAgent for Fixed {
        fn name(&self) -> &str {
            &self.name
        }

        fn role(&self) -> Role {
            self.role
        }

        async fn invoke(
            &self,
            _snapshot: &SessionSnapshot,
            _prior: &[AgentReport],
        ) -> Result<AgentReport, AgentError> {
            Ok(AgentReport::outcome(
                self.role,
                &self.name,
                "noop",
                "root-cause:none",
            ))
        }
    }

    fn fixed(name: &str, role: Role) -> SharedAgent {
        Arc::new(Fixed {
            name: name.to_string(),
            role,
        })
    }

    #[test]
    fn test_registry_groups_by_role() {
        let registry = AgentRegistry::new()
            .with(fixed("a1", Role::Analyst))
            .with(fixed("a2", Role::Analyst))
            .with(fixed("p1", Role::Patcher));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.agents_for(Role::Analyst).len(), 2);
        assert_eq!(registry.agents_for(Role::Analyst)[1].name(), "a2");
        assert!(!registry.has_role(Role::Coordinator));
        assert_eq!(registry.missing_roles(), vec![Role::Verifier]);
    }

    #[test]
    fn test_snapshot_of_new_session() {
        let record = SessionRecord::create(DefectReference::new("BUG-1", "crash"), 4).unwrap();
        let snapshot = SessionSnapshot::of(&record, 1);
        assert_eq!(snapshot.state, RepairState::Wait);
        assert_eq!(snapshot.iteration_count, 0);
        assert_eq!(snapshot.max_iterations, 4);
        assert!(snapshot.prior_decisions.is_empty());
        assert!(snapshot.reusable_patch.is_none());
    }

    #[test]
    fn test_agent_error_failure_kind() {
        assert_eq!(
            AgentError::Unavailable("down".into()).failure(),
            AgentFailure::Unavailable
        );
    }
}
