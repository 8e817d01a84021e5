//! Shared test agents for controller integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use repair_coordination::{
    AgentError, AgentRegistry, AgentReport, OrchestratorConfig, RepairAgent, Role,
    SessionSnapshot, SharedAgent,
};

/// One canned response.
#[derive(Debug, Clone)]
pub enum Step {
    Decide(&'static str),
    DecideAfter(&'static str, Duration),
    Error,
    Panic,
}

/// Replays its steps in order, repeating the last one forever.
pub struct Script {
    name: String,
    role: Role,
    steps: Vec<Step>,
    calls: AtomicUsize,
}

impl Script {
    pub fn new(name: &str, role: Role, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            role,
            steps,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(name: &str, role: Role, decision: &'static str) -> Arc<Self> {
        Self::new(name, role, vec![Step::Decide(decision)])
    }

    pub fn shared(self: &Arc<Self>) -> SharedAgent {
        self.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepairAgent for Script {
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
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .get(call)
            .or_else(|| self.steps.last())
            .cloned()
            .unwrap_or(Step::Error);

        match step {
            Step::Decide(decision) => Ok(AgentReport::outcome(
                self.role, &self.name, "scripted", decision,
            )),
            Step::DecideAfter(decision, delay) => {
                tokio::time::sleep(delay).await;
                Ok(AgentReport::outcome(
                    self.role, &self.name, "scripted", decision,
                ))
            }
            Step::Error => Err(AgentError::Internal("scripted failure".to_string())),
            Step::Panic => panic!("scripted panic"),
        }
    }
}

pub fn registry(agents: Vec<SharedAgent>) -> AgentRegistry {
    agents
        .into_iter()
        .fold(AgentRegistry::new(), |registry, agent| registry.with(agent))
}

/// Analyst, patcher and verifier that always succeed.
pub fn happy_path() -> Vec<SharedAgent> {
    vec![
        Script::always("analyst", Role::Analyst, "root-cause:resource-leak").shared(),
        Script::always("patcher", Role::Patcher, "patch:candidate").shared(),
        Script::always("verifier", Role::Verifier, "verification:pass").shared(),
    ]
}

/// Defaults with short, deterministic timeouts.
pub fn config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.max_iterations = 15;
    config.arbiter.agreement_threshold = 0.5;
    config.timeouts.coordinator_secs = 5;
    config.timeouts.analyst_secs = 5;
    config.timeouts.patcher_secs = 5;
    config.timeouts.verifier_secs = 5;
    config
}
