//! Consensus arbitration over same-role agent reports.
//!
//! - **classify**: normalize raw decisions into keys, detect dissent
//! - **decision**: the canonical decision and its deadlock causes
//! - **voting**: plurality vote with deterministic tie-breaking

pub mod classify;
pub mod decision;
pub mod voting;

pub use classify::{classify, namespace_for, Classification, DecisionKey, DissentKind};
pub use decision::{ArbitrationOutcome, CanonicalDecision, DeadlockCause, VoteTally};
pub use voting::{ArbiterConfig, ConsensusArbiter};
