//! Decision → transition mapping for the repair state machine.

use crate::arbiter::{namespace_for, CanonicalDecision};
use crate::session::{RepairState, TransitionCause};

/// The edge a canonical decision selects from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub to: RepairState,
    pub cause: TransitionCause,
}

impl Move {
    fn new(to: RepairState, cause: TransitionCause) -> Self {
        Self { to, cause }
    }

    fn back(cause: TransitionCause) -> Self {
        Self::new(RepairState::Wait, cause)
    }

    pub fn is_loop_back(&self) -> bool {
        self.cause.is_loop_back()
    }
}

/// Map a canonical decision to the next edge.
///
/// `cached_verify` says whether the WAIT → VERIFY short path is open (a
/// reusable patch exists and the configuration allows it). Decisions outside
/// the current state's vocabulary loop back as invalid.
pub fn resolve(state: RepairState, decision: &CanonicalDecision, cached_verify: bool) -> Move {
    use RepairState::*;
    use TransitionCause as C;

    let Some(key) = decision.key() else {
        return Move::back(C::ArbitrationDeadlock);
    };
    if state.required_role().map(namespace_for) != Some(key.namespace()) {
        return Move::back(C::InvalidDecision);
    }

    let head = key.detail().split(':').next().unwrap_or_default();
    match (state, head) {
        (Wait, "analyze") => Move::new(Analyze, C::Dispatched),
        (Wait, "verify-cached") if cached_verify => Move::new(Verify, C::CachedPatchReused),
        (Analyze, "unknown" | "none") => Move::back(C::NoActionableCause),
        (Analyze, _) => Move::new(Patch, C::RootCauseIdentified),
        (Patch, "candidate") => Move::new(Verify, C::PatchProduced),
        (Patch, "failed") => Move::back(C::PatchFailed),
        (Verify, "pass") => Move::new(Resolved, C::VerificationPassed),
        (Verify, "fail") => Move::back(C::VerificationFailed),
        _ => Move::back(C::InvalidDecision),
    }
}
