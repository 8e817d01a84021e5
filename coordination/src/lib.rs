//! Repair Coordination Library
//!
//! Coordinates a pool of specialized agents (analysts, patchers, verifiers)
//! working on a single software defect:
//! - Append-only session record with folded state and iteration count
//! - Consensus arbitration over redundant same-role reports
//! - Hard iteration ceiling with guaranteed escalation to a human
//! - Per-session controller, multi-session orchestrator, observer event bus
//!
//! # Lifecycle
//!
//! ```text
//! WAIT ──▶ ANALYZE ──▶ PATCH ──▶ VERIFY ──▶ RESOLVED
//!  ▲  │        │          │         │
//!  │  └────────┴──────────┴─────────┘──▶ ESCALATED (any non-terminal state)
//!  └──── loop-back (iteration + 1, governed) ◀──┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use repair_coordination::{AgentRegistry, DefectReference, Orchestrator, OrchestratorConfig};
//!
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default(), registry);
//! let record = orchestrator
//!     .run_session(DefectReference::new("BUG-42", "fd leak in watcher"), Some(5))
//!     .await?;
//! println!("{}", record.summary());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod arbiter;
pub mod config;
pub mod controller;
pub mod escalation;
pub mod events;
pub mod session;

pub use agent::{AgentError, AgentRegistry, RepairAgent, SessionSnapshot, SharedAgent};
pub use arbiter::{
    ArbiterConfig, ArbitrationOutcome, CanonicalDecision, ConsensusArbiter, DeadlockCause,
    DecisionKey, DissentKind, VoteTally,
};
pub use config::{ConfigError, ConfigResult, OrchestratorConfig, RoleTimeouts};
pub use controller::{ControllerError, ControllerResult, Orchestrator, SessionController};
pub use escalation::{
    admit, Admission, ChannelEscalationSink, EscalationSink, IterationGovernor,
    LogEscalationSink, SinkError,
};
pub use events::{EventBus, EventBusExt, EventFilter, RepairEvent, SharedEventBus};
pub use session::{
    AgentFailure, AgentReport, DefectReference, DispatchRound, EscalationReason,
    EscalationRecord, RepairState, ReportResult, Role, SessionError, SessionExport,
    SessionRecord, SessionResult, Transition, TransitionCause, DEFAULT_MAX_ITERATIONS,
};
