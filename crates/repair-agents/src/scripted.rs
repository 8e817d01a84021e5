//! Scripted agents: deterministic replay of canned reports.
//!
//! Each invocation consumes the next step of the script; once the script is
//! exhausted the final step repeats for every later call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use repair_coordination::{AgentError, AgentReport, RepairAgent, Role, SessionSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

fn default_action() -> String {
    "scripted".to_string()
}

/// One canned response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Free-text next step recorded on the report.
    #[serde(default = "default_action")]
    pub action: String,
    /// Raw decision string, e.g. `root-cause:resource-leak`.
    #[serde(default)]
    pub decision: Option<String>,
    /// Simulated work before answering.
    #[serde(default)]
    pub delay_ms: u64,
    /// Answer with an agent error instead of a decision.
    #[serde(default)]
    pub error: Option<String>,
}

impl ScriptStep {
    pub fn decide(decision: impl Into<String>) -> Self {
        Self {
            action: default_action(),
            decision: Some(decision.into()),
            delay_ms: 0,
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            action: default_action(),
            decision: None,
            delay_ms: 0,
            error: Some(message.into()),
        }
    }

    pub fn after_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Agent that replays a fixed script.
#[derive(Debug)]
pub struct ScriptedAgent {
    name: String,
    role: Role,
    steps: Vec<ScriptStep>,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>, role: Role, steps: Vec<ScriptStep>) -> Self {
        Self {
            name: name.into(),
            role,
            steps,
            calls: AtomicUsize::new(0),
        }
    }

    /// Invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn step(&self, call: usize) -> Option<&ScriptStep> {
        self.steps.get(call).or_else(|| self.steps.last())
    }
}

#[async_trait]
impl RepairAgent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Role {
        self.role
    }

    async fn invoke(
        &self,
        snapshot: &SessionSnapshot,
        prior: &[AgentReport],
    ) -> Result<AgentReport, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .step(call)
            .ok_or_else(|| AgentError::Internal(format!("{} has an empty script", self.name)))?;

        debug!(
            agent = %self.name,
            call,
            round = snapshot.round,
            prior = prior.len(),
            "Replaying scripted step"
        );

        if step.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }

        if let Some(message) = &step.error {
            return Err(AgentError::Internal(message.clone()));
        }

        let decision = step.decision.clone().unwrap_or_default();
        Ok(
            AgentReport::outcome(self.role, &self.name, &step.action, decision).with_detail(json!({
                "call": call,
                "iteration": snapshot.iteration_count,
                "prior_reports": prior.len(),
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repair_coordination::{DefectReference, ReportResult, SessionRecord};

    fn snapshot() -> SessionSnapshot {
        let record = SessionRecord::create(DefectReference::new("BUG-1", "leak"), 3).unwrap();
        SessionSnapshot::of(&record, 1)
    }

    #[tokio::test]
    async fn test_replays_then_repeats_last_step() {
        let agent = ScriptedAgent::new(
            "v",
            Role::Verifier,
            vec![
                ScriptStep::decide("verification:fail"),
                ScriptStep::decide("verification:pass"),
            ],
        );
        let snapshot = snapshot();

        let decisions: Vec<String> = {
            let mut out = Vec::new();
            for _ in 0..4 {
                let report = agent.invoke(&snapshot, &[]).await.unwrap();
                out.push(report.decision().unwrap_or_default().to_string());
            }
            out
        };
        assert_eq!(
            decisions,
            vec![
                "verification:fail",
                "verification:pass",
                "verification:pass",
                "verification:pass"
            ]
        );
        assert_eq!(agent.calls(), 4);
    }

    #[tokio::test]
    async fn test_error_step() {
        let agent = ScriptedAgent::new("a", Role::Analyst, vec![ScriptStep::fail("model offline")]);
        let err = agent.invoke(&snapshot(), &[]).await.unwrap_err();
        assert!(err.to_string().contains("model offline"));
    }

    #[tokio::test]
    async fn test_empty_script_is_an_error() {
        let agent = ScriptedAgent::new("a", Role::Analyst, vec![]);
        assert!(agent.invoke(&snapshot(), &[]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_and_detail() {
        let agent = ScriptedAgent::new(
            "p",
            Role::Patcher,
            vec![ScriptStep::decide("patch:candidate").after_ms(1_500)],
        );
        let start = tokio::time::Instant::now();
        let report = agent.invoke(&snapshot(), &[]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1_500));
        match report.result {
            ReportResult::Outcome { detail, .. } => assert_eq!(detail["call"], 0),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_step_from_toml() {
        let step: ScriptStep = toml::from_str("decision = \"patch:failed\"\ndelay_ms = 20").unwrap();
        assert_eq!(step.action, "scripted");
        assert_eq!(step.decision.as_deref(), Some("patch:failed"));
        assert_eq!(step.delay_ms, 20);
    }
}
