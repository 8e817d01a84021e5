//! Escalation policy and the hand-off to humans.
//!
//! ```text
//! loop-back proposed
//!     │
//!     ├─ iteration_count + 1 > max_iterations → ESCALATED (iteration-ceiling-exceeded)
//!     ├─ k consecutive deadlocks              → ESCALATED (arbitration-deadlock)
//!     └─ otherwise                            → WAIT, iteration + 1
//!
//! ESCALATED ──▶ EscalationSink::notify (once)
//! ```

pub mod governor;
pub mod sink;

pub use governor::{admit, Admission, DeadlockGuard, IterationGovernor};
pub use sink::{ChannelEscalationSink, EscalationSink, LogEscalationSink, SinkError};
