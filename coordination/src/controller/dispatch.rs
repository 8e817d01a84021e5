//! Round dispatch: fan out to every agent of a role, collect under a deadline.
//!
//! Each invocation runs in its own task and answers over the session's
//! report channel, tagged with the round it was dispatched for. A report
//! tagged with any other round is stale and never reaches arbitration.
//! Invocations still running when the window closes are aborted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::agent::{SessionSnapshot, SharedAgent};
use crate::session::{AgentFailure, AgentReport, Role, RoundNumber};

/// A report in flight, tagged with its round and dispatch slot.
#[derive(Debug)]
pub struct Envelope {
    pub round: RoundNumber,
    pub slot: usize,
    pub agent: String,
    pub report: AgentReport,
}

/// A report that arrived for a round other than the one being collected.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleReport {
    pub round: RoundNumber,
    pub agent: String,
}

/// Everything one round produced.
#[derive(Debug, Default)]
pub struct RoundOutcome {
    pub dispatched: Vec<String>,
    /// In arrival order.
    pub reports: Vec<AgentReport>,
    pub timed_out: Vec<String>,
    pub stale: Vec<StaleReport>,
}

/// Per-session report channel and dispatch loop.
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    /// Sender half, for delivering reports from outside a dispatch.
    pub fn sender(&self) -> mpsc::UnboundedSender<Envelope> {
        self.sender.clone()
    }

    /// Invoke `agents` for `round` and collect until all answer or `window` elapses.
    pub async fn run_round(
        &mut self,
        round: RoundNumber,
        role: Role,
        agents: &[SharedAgent],
        snapshot: SessionSnapshot,
        prior: Vec<AgentReport>,
        window: Duration,
    ) -> RoundOutcome {
        let mut outcome = RoundOutcome {
            dispatched: agents.iter().map(|a| a.name().to_string()).collect(),
            ..Default::default()
        };

        // Late answers from sealed rounds that arrived between rounds.
        while let Ok(envelope) = self.receiver.try_recv() {
            outcome.stale.push(StaleReport {
                round: envelope.round,
                agent: envelope.agent,
            });
        }

        let snapshot = Arc::new(snapshot);
        let prior = Arc::new(prior);
        let mut in_flight: BTreeMap<usize, AbortHandle> = BTreeMap::new();
        for (slot, agent) in agents.iter().enumerate() {
            let handle = spawn_invocation(
                Invocation {
                    round,
                    slot,
                    role,
                    agent: agent.clone(),
                    snapshot: snapshot.clone(),
                    prior: prior.clone(),
                },
                self.sender.clone(),
            );
            in_flight.insert(slot, handle);
        }

        let mut pending: BTreeMap<usize, String> = outcome
            .dispatched
            .iter()
            .cloned()
            .enumerate()
            .collect();
        let deadline = Instant::now() + window;

        while !pending.is_empty() {
            match timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(envelope)) => {
                    if envelope.round == round && pending.remove(&envelope.slot).is_some() {
                        debug!(round, agent = %envelope.agent, "Report received");
                        outcome.reports.push(envelope.report);
                    } else {
                        outcome.stale.push(StaleReport {
                            round: envelope.round,
                            agent: envelope.agent,
                        });
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    for (slot, agent) in &pending {
                        warn!(
                            round,
                            agent = %agent,
                            role = %role,
                            timeout_ms = window.as_millis() as u64,
                            "Agent timed out"
                        );
                        // The round is sealed; the late answer could only be stale.
                        if let Some(handle) = in_flight.get(slot) {
                            handle.abort();
                        }
                    }
                    break;
                }
            }
        }

        outcome.timed_out = pending.into_values().collect();
        outcome
    }
}

struct Invocation {
    round: RoundNumber,
    slot: usize,
    role: Role,
    agent: SharedAgent,
    snapshot: Arc<SessionSnapshot>,
    prior: Arc<Vec<AgentReport>>,
}

/// Run one agent in an isolated task; panics and errors become failure reports.
///
/// Returns the handle that cancels the agent's work if the round times out.
fn spawn_invocation(
    invocation: Invocation,
    sender: mpsc::UnboundedSender<Envelope>,
) -> AbortHandle {
    let Invocation {
        round,
        slot,
        role,
        agent,
        snapshot,
        prior,
    } = invocation;

    let name = agent.name().to_string();
    let task = tokio::spawn(async move { agent.invoke(&snapshot, &prior).await });
    let handle = task.abort_handle();

    tokio::spawn(async move {
        let report = match task.await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(round, agent = %name, error = %e, "Agent returned an error");
                AgentReport::failed(role, &name, e.failure(), e.to_string())
            }
            Err(join_error) if join_error.is_cancelled() => {
                debug!(round, agent = %name, "Agent invocation cancelled");
                return;
            }
            Err(join_error) => {
                warn!(round, agent = %name, error = %join_error, "Agent task panicked");
                AgentReport::failed(role, &name, AgentFailure::Panicked, join_error.to_string())
            }
        };

        // Receiver gone means the session finished; nothing to deliver to.
        let _ = sender.send(Envelope {
            round,
            slot,
            agent: name,
            report,
        });
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, RepairAgent};
    use crate::session::{DefectReference, SessionRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Delayed {
        name: String,
        delay: Duration,
        decision: &'static str,
    }

    #[async_trait]
    impl RepairAgent for Delayed {
        fn name(&self) -> &str {
            &self.name
        }

        fn role(&self) -> Role {
            Role::Analyst
        }

        async fn invoke(
            &self,
            _snapshot: &SessionSnapshot,
            _prior: &[AgentReport],
        ) -> Result<AgentReport, AgentError> {
            tokio::time::sleep(self.delay).await;
            Ok(AgentReport::outcome(
                Role::Analyst,
                &self.name,
                "inspect",
                self.decision,
            ))
        }
    }

    /// Never answers; counts invocations that are still alive.
    struct Hung {
        live: Arc<AtomicUsize>,
    }

    struct LiveGuard(Arc<AtomicUsize>);

    impl LiveGuard {
        fn enter(live: &Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self(live.clone())
        }
    }

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RepairAgent for Hung {
        fn name(&self) -> &str {
            "hung"
        }

        fn role(&self) -> Role {
            Role::Analyst
        }

        async fn invoke(
            &self,
            _snapshot: &SessionSnapshot,
            _prior: &[AgentReport],
        ) -> Result<AgentReport, AgentError> {
            let _guard = LiveGuard::enter(&self.live);
            std::future::pending().await
        }
    }

    struct Panicking;

    #[async_trait]
    impl RepairAgent for Panicking {
        fn name(&self) -> &str {
            "boom"
        }

        fn role(&self) -> Role {
            Role::Analyst
        }

        async fn invoke(
            &self,
            _snapshot: &SessionSnapshot,
            _prior: &[AgentReport],
        ) -> Result<AgentReport, AgentError> {
            panic!("agent blew up");
        }
    }

    fn delayed(name: &str, secs: u64) -> SharedAgent {
        Arc::new(Delayed {
            name: name.to_string(),
            delay: Duration::from_secs(secs),
            decision: "root-cause:leak",
        })
    }

    fn snapshot() -> SessionSnapshot {
        let record = SessionRecord::create(DefectReference::new("BUG-1", "leak"), 3).unwrap();
        SessionSnapshot::of(&record, 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_all_reports() {
        let mut dispatcher = Dispatcher::new();
        let agents = vec![delayed("a1", 1), delayed("a2", 2)];
        let outcome = dispatcher
            .run_round(1, Role::Analyst, &agents, snapshot(), vec![], Duration::from_secs(10))
            .await;
        assert_eq!(outcome.reports.len(), 2);
        assert!(outcome.timed_out.is_empty());
        assert_eq!(outcome.reports[0].agent, "a1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_agent_times_out_and_is_cancelled() {
        let mut dispatcher = Dispatcher::new();
        let agents = vec![delayed("fast", 1), delayed("slow", 30)];
        let outcome = dispatcher
            .run_round(1, Role::Analyst, &agents, snapshot(), vec![], Duration::from_secs(5))
            .await;
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.timed_out, vec!["slow".to_string()]);

        tokio::time::sleep(Duration::from_secs(60)).await;

        let next = dispatcher
            .run_round(2, Role::Analyst, &[delayed("fast", 1)], snapshot(), vec![], Duration::from_secs(5))
            .await;
        assert!(next.stale.is_empty());
        assert_eq!(next.reports.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_invocation_is_dropped_after_timeout() {
        let live = Arc::new(AtomicUsize::new(0));
        let agents: Vec<SharedAgent> = vec![Arc::new(Hung { live: live.clone() })];
        let mut dispatcher = Dispatcher::new();

        for round in 1..=3 {
            let outcome = dispatcher
                .run_round(round, Role::Analyst, &agents, snapshot(), vec![], Duration::from_secs(5))
                .await;
            assert_eq!(outcome.timed_out, vec!["hung".to_string()]);
        }

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_report() {
        let mut dispatcher = Dispatcher::new();
        let agents: Vec<SharedAgent> = vec![Arc::new(Panicking)];
        let outcome = dispatcher
            .run_round(1, Role::Analyst, &agents, snapshot(), vec![], Duration::from_secs(5))
            .await;
        assert_eq!(outcome.reports.len(), 1);
        assert!(outcome.reports[0].decision().is_none());
        assert!(matches!(
            outcome.reports[0].result,
            crate::session::ReportResult::Failed {
                failure: AgentFailure::Panicked,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_wrong_round_envelope_is_stale() {
        let mut dispatcher = Dispatcher::new();
        let sender = dispatcher.sender();
        let agents = vec![delayed("a1", 0)];
        sender
            .send(Envelope {
                round: 7,
                slot: 0,
                agent: "ghost".to_string(),
                report: AgentReport::outcome(Role::Analyst, "ghost", "x", "root-cause:ghost"),
            })
            .unwrap();
        let outcome = dispatcher
            .run_round(8, Role::Analyst, &agents, snapshot(), vec![], Duration::from_secs(5))
            .await;
        assert_eq!(outcome.stale.len(), 1);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].agent, "a1");
    }
}
