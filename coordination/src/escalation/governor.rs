//! Iteration governor: the hard ceiling on loop-back cycles.
//!
//! Consulted by the controller before every transition that would increment
//! the iteration count. Pure and deterministic: the same count and ceiling
//! always yield the same admission.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Verdict for a proposed loop-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Admission {
    /// The loop-back may proceed with this iteration number.
    Continue { next_iteration: u32 },
    /// The ceiling is exceeded; the session must escalate instead.
    ForceEscalate {
        attempted_iteration: u32,
        max_iterations: u32,
    },
}

/// Decide whether a loop-back from `iteration_count` stays under `max_iterations`.
pub fn admit(iteration_count: u32, max_iterations: u32) -> Admission {
    let next = iteration_count.saturating_add(1);
    if next > max_iterations {
        Admission::ForceEscalate {
            attempted_iteration: next,
            max_iterations,
        }
    } else {
        Admission::Continue {
            next_iteration: next,
        }
    }
}

/// Per-session wrapper around [`admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationGovernor {
    max_iterations: u32,
}

impl IterationGovernor {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn admit(&self, iteration_count: u32) -> Admission {
        let admission = admit(iteration_count, self.max_iterations);
        if let Admission::ForceEscalate {
            attempted_iteration,
            max_iterations,
        } = admission
        {
            warn!(
                attempted_iteration,
                max_iterations, "Iteration ceiling exceeded; forcing escalation"
            );
        }
        admission
    }
}

/// Consecutive-deadlock detector.
///
/// A threshold of 0 disables deadlock escalation; the iteration ceiling still
/// bounds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlockGuard {
    threshold: u32,
}

impl DeadlockGuard {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// `streak` counts the deadlock about to be recorded.
    pub fn should_escalate(&self, streak: u32) -> bool {
        self.threshold > 0 && streak >= self.threshold
    }
}
