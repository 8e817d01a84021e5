//! Consensus arbiter
//!
//! Reconciles N same-role reports into one decision.
//!
//! Plurality vote over normalized decision keys with a deterministic
//! tie-break: larger group first, then the group holding the earliest
//! report, then the lexicographically smallest key. The same multiset of
//! reports always yields the same decision regardless of arrival order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::classify::{classify, Classification, DecisionKey};
use super::decision::{ArbitrationOutcome, CanonicalDecision, DeadlockCause, VoteTally};
use crate::session::{AgentReport, Role, RoundNumber};

/// Thresholds governing when a round counts as agreed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Minimum agreement ratio for a decision (inclusive).
    pub agreement_threshold: f64,
    /// Minimum number of reports regardless of fan-out.
    pub min_reports: usize,
    /// Fraction of dispatched agents that must answer.
    pub quorum: f64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            agreement_threshold: 0.5,
            min_reports: 1,
            quorum: 0.5,
        }
    }
}

impl ArbiterConfig {
    /// Reports required for a round that dispatched `dispatched` agents.
    pub fn required_reports(&self, dispatched: usize) -> usize {
        let by_quorum = (dispatched as f64 * self.quorum).ceil() as usize;
        by_quorum.max(self.min_reports)
    }
}

/// Stateless, deterministic arbiter.
#[derive(Debug, Clone, Default)]
pub struct ConsensusArbiter {
    config: ArbiterConfig,
}

struct Group<'a> {
    /// Earliest report, ties broken by agent name then report id.
    earliest: &'a AgentReport,
    reports: Vec<&'a AgentReport>,
}

impl<'a> Group<'a> {
    fn new(report: &'a AgentReport) -> Self {
        Self {
            earliest: report,
            reports: vec![report],
        }
    }

    fn add(&mut self, report: &'a AgentReport) {
        let precedes = report
            .produced_at
            .cmp(&self.earliest.produced_at)
            .then_with(|| report.agent.cmp(&self.earliest.agent))
            .then_with(|| report.id.cmp(&self.earliest.id))
            .is_lt();
        if precedes {
            self.earliest = report;
        }
        self.reports.push(report);
    }
}

impl ConsensusArbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Arbitrate the reports of one round.
    ///
    /// `dispatched` is the number of agents invoked; agents that timed out are
    /// simply absent from `reports`.
    pub fn arbitrate(
        &self,
        round: RoundNumber,
        role: Role,
        dispatched: usize,
        reports: &[AgentReport],
    ) -> CanonicalDecision {
        let total = reports.len();
        let mut groups: BTreeMap<DecisionKey, Group<'_>> = BTreeMap::new();
        let mut dissenting = Vec::new();

        for report in reports {
            match classify(report, role) {
                Classification::Vote(key) => match groups.get_mut(&key) {
                    Some(group) => group.add(report),
                    None => {
                        groups.insert(key, Group::new(report));
                    }
                },
                Classification::Dissent(kind) => {
                    debug!(round, agent = %report.agent, kind = %kind, "Dissenting report");
                    dissenting.push(report.id.clone());
                }
            }
        }
        dissenting.sort();

        let mut ranked: Vec<(&DecisionKey, &Group<'_>)> = groups.iter().collect();
        ranked.sort_by(|(ka, ga), (kb, gb)| {
            gb.reports
                .len()
                .cmp(&ga.reports.len())
                .then_with(|| ga.earliest.produced_at.cmp(&gb.earliest.produced_at))
                .then_with(|| ka.cmp(kb))
        });

        let tallies: Vec<VoteTally> = ranked
            .iter()
            .map(|(key, group)| {
                let mut report_ids: Vec<_> = group.reports.iter().map(|r| r.id.clone()).collect();
                report_ids.sort();
                VoteTally {
                    key: (*key).clone(),
                    votes: group.reports.len(),
                    earliest_at: group.earliest.produced_at,
                    report_ids,
                }
            })
            .collect();

        let leader = ranked.first();
        let agreement_ratio = match (leader, total) {
            (Some((_, group)), t) if t > 0 => group.reports.len() as f64 / t as f64,
            _ => 0.0,
        };

        let required = self.config.required_reports(dispatched);
        let deadlock = if total == 0 {
            Some(DeadlockCause::NoReports)
        } else if total < required {
            Some(DeadlockCause::InsufficientReports {
                got: total,
                need: required,
            })
        } else if leader.is_none() {
            Some(DeadlockCause::NoValidVotes)
        } else if agreement_ratio < self.config.agreement_threshold {
            Some(DeadlockCause::LowAgreement {
                ratio: agreement_ratio,
                threshold: self.config.agreement_threshold,
            })
        } else {
            None
        };

        let decision = match (deadlock, leader) {
            (None, Some((key, group))) => {
                let chosen = group.earliest;
                CanonicalDecision {
                    round,
                    role,
                    outcome: ArbitrationOutcome::Agreed { key: (*key).clone() },
                    chosen_report_ref: Some(chosen.id.clone()),
                    agreement_ratio,
                    next_action: chosen.action.clone(),
                    total_reports: total,
                    tallies,
                    dissenting,
                }
            }
            (cause, _) => {
                let cause = cause.unwrap_or(DeadlockCause::NoValidVotes);
                warn!(round, role = %role, cause = %cause, "Arbitration deadlock");
                CanonicalDecision {
                    round,
                    role,
                    outcome: ArbitrationOutcome::Deadlock { cause },
                    chosen_report_ref: None,
                    agreement_ratio,
                    next_action: String::new(),
                    total_reports: total,
                    tallies,
                    dissenting,
                }
            }
        };

        info!(
            round,
            role = %role,
            decision = %decision.label(),
            agreement = decision.agreement_ratio,
            reports = total,
            "Arbitration complete"
        );

        decision
    }
}
