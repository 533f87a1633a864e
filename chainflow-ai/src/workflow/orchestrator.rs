//! Phase Orchestrator
//!
//! Per-message state machine:
//!
//! ```text
//! NEW → PHASE1_DONE → PHASE2_DONE → DONE                    (incomplete chain)
//! NEW → PHASE1_DONE → PHASE2_DONE → PHASE3_DONE → DONE      (complete chain)
//! ```
//!
//! Every message runs Phase 1 and Phase 2. Phase 3 runs only when the owning
//! chain is complete. `next_phase` depends on nothing but the last completed
//! phase and the chain's completeness, so resuming an interrupted run is just
//! re-evaluating it from the persisted `current_phase`.

use crate::types::Phase;

/// Where a message stands in its phase sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    New,
    Phase1Done,
    Phase2Done,
    Phase3Done,
    Done,
}

/// Next phase to execute, or `None` when the message is done
pub fn next_phase(current_phase: Option<Phase>, is_complete: bool) -> Option<Phase> {
    match current_phase {
        None => Some(Phase::One),
        Some(Phase::One) => Some(Phase::Two),
        Some(Phase::Two) if is_complete => Some(Phase::Three),
        Some(Phase::Two) | Some(Phase::Three) => None,
    }
}

/// Phase that must have succeeded before `phase` can run
pub fn previous_phase(phase: Phase) -> Option<Phase> {
    match phase {
        Phase::One => None,
        Phase::Two => Some(Phase::One),
        Phase::Three => Some(Phase::Two),
    }
}

/// Full ordered phase plan for a message of a chain
pub fn plan_phases(is_complete: bool) -> Vec<Phase> {
    let mut plan = Vec::with_capacity(3);
    let mut current = None;
    while let Some(phase) = next_phase(current, is_complete) {
        plan.push(phase);
        current = Some(phase);
    }
    plan
}

pub fn phase_state(current_phase: Option<Phase>, is_complete: bool) -> PhaseState {
    if current_phase.is_some() && next_phase(current_phase, is_complete).is_none() {
        return PhaseState::Done;
    }
    match current_phase {
        None => PhaseState::New,
        Some(Phase::One) => PhaseState::Phase1Done,
        Some(Phase::Two) => PhaseState::Phase2Done,
        Some(Phase::Three) => PhaseState::Phase3Done,
    }
}
