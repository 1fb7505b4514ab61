//! Blackboard threaded through every state handler.

use crate::model::HvacMode;

/// Cycle boundaries requested by state entry/exit during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleRequests {
    pub start: Option<HvacMode>,
    pub finish: Option<HvacMode>,
}

#[derive(Debug, Clone)]
pub struct ModeContext {
    /// Mode reported by the detector for this tick.
    pub detected: HvacMode,
    pub requests: CycleRequests,
    pub ticks_in_state: u64,
    pub total_ticks: u64,
}

impl Default for ModeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeContext {
    pub fn new() -> Self {
        Self {
            detected: HvacMode::Idle,
            requests: CycleRequests::default(),
            ticks_in_state: 0,
            total_ticks: 0,
        }
    }

    /// Hand the pending requests to the caller and clear them.
    pub fn take_requests(&mut self) -> CycleRequests {
        core::mem::take(&mut self.requests)
    }
}
