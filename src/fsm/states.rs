//! State handlers and table builder.
//!
//! ```text
//!          ┌──[detected heating]──▶ HEATING ──┐
//!          │                          ▲  │    │
//!  IDLE ◀──┤                          │  ▼    ├──[detected idle]──▶ IDLE
//!          │                          │  │    │
//!          └──[detected cooling]──▶ COOLING ──┘
//! ```
//!
//! Heating and cooling switch directly into each other; the exit of one
//! and the entry of the other land in the same tick.

use log::info;

use super::context::ModeContext;
use super::{StateDescriptor, StateId};
use crate::model::HvacMode;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: None,
            on_exit: None,
            on_update: follow_detected,
        },
        StateDescriptor {
            id: StateId::Heating,
            name: "Heating",
            on_enter: Some(heating_enter),
            on_exit: Some(heating_exit),
            on_update: follow_detected,
        },
        StateDescriptor {
            id: StateId::Cooling,
            name: "Cooling",
            on_enter: Some(cooling_enter),
            on_exit: Some(cooling_exit),
            on_update: follow_detected,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  Handlers
// ═══════════════════════════════════════════════════════════════════════════

/// Every state moves to whatever the detector saw; the engine ignores a
/// request for the current state.
fn follow_detected(ctx: &mut ModeContext) -> Option<StateId> {
    Some(StateId::from(ctx.detected))
}

fn heating_enter(ctx: &mut ModeContext) {
    begin(ctx, HvacMode::Heating);
}

fn heating_exit(ctx: &mut ModeContext) {
    end(ctx, HvacMode::Heating);
}

fn cooling_enter(ctx: &mut ModeContext) {
    begin(ctx, HvacMode::Cooling);
}

fn cooling_exit(ctx: &mut ModeContext) {
    end(ctx, HvacMode::Cooling);
}

fn begin(ctx: &mut ModeContext, mode: HvacMode) {
    info!("{} cycle requested", mode);
    ctx.requests.start = Some(mode);
}

fn end(ctx: &mut ModeContext, mode: HvacMode) {
    info!("{} cycle ending after {} ticks", mode, ctx.ticks_in_state);
    ctx.requests.finish = Some(mode);
}
