//! Session controller and the machinery around it.
//!
//! - **machine**: canonical decision → next edge
//! - **dispatch**: per-round fan-out, deadline collection, stale rejection
//! - **session**: the per-session control loop
//! - **orchestrator**: session creation and multi-session scheduling

pub mod dispatch;
pub mod machine;
pub mod orchestrator;
pub mod session;

pub use dispatch::{Dispatcher, Envelope, RoundOutcome, StaleReport};
pub use machine::{resolve, Move};
pub use orchestrator::Orchestrator;
pub use session::{ControllerError, ControllerResult, SessionController};
