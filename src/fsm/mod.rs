//! Function-pointer finite state machine for the HVAC mode.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  StateTable                                              │
//! │  ┌─────────┬───────────┬──────────┬───────────────────┐  │
//! │  │ StateId │ on_enter  │ on_exit  │ on_update         │  │
//! │  ├─────────┼───────────┼──────────┼───────────────────┤  │
//! │  │ Idle    │ -         │ -        │ fn(ctx)->Option<> │  │
//! │  │ Heating │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option<> │  │
//! │  │ Cooling │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option<> │  │
//! │  └─────────┴───────────┴──────────┴───────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the current state with the
//! freshly detected mode in [`ModeContext`]. Entering an active state
//! requests a cycle start; leaving one requests a cycle finish. The
//! service reads those requests back after the tick and acts on them.

pub mod context;
pub mod states;

use context::ModeContext;
use log::info;

use crate::model::HvacMode;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Must stay in sync with [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Idle = 0,
    Heating = 1,
    Cooling = 2,
}

impl StateId {
    pub const COUNT: usize = 3;

    /// Returns `Idle` for an out-of-range index in release builds.
    fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Idle,
            1 => Self::Heating,
            2 => Self::Cooling,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Idle
            }
        }
    }

    pub fn mode(self) -> HvacMode {
        match self {
            Self::Idle => HvacMode::Idle,
            Self::Heating => HvacMode::Heating,
            Self::Cooling => HvacMode::Cooling,
        }
    }
}

impl From<HvacMode> for StateId {
    fn from(mode: HvacMode) -> Self {
        match mode {
            HvacMode::Idle => Self::Idle,
            HvacMode::Heating => Self::Heating,
            HvacMode::Cooling => Self::Cooling,
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

pub type StateActionFn = fn(&mut ModeContext);

/// Returns `Some(next)` to trigger a transition, or `None` to stay.
pub type StateUpdateFn = fn(&mut ModeContext) -> Option<StateId>;

pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
    tick_count: u64,
    state_entry_tick: u64,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
            tick_count: 0,
            state_entry_tick: 0,
        }
    }

    /// Run the initial `on_enter`. Call once before the first `tick()`.
    pub fn start(&mut self, ctx: &mut ModeContext) {
        info!("FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance by one tick: `on_update`, then `on_exit` → `on_enter` when
    /// it asks for a different state.
    pub fn tick(&mut self, ctx: &mut ModeContext) {
        self.tick_count += 1;
        ctx.ticks_in_state = self.tick_count - self.state_entry_tick;
        ctx.total_ticks = self.tick_count;

        let next = (self.table[self.current].on_update)(ctx);

        if let Some(next_id) = next {
            if next_id as usize != self.current {
                self.transition(next_id, ctx);
            }
        }
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    pub fn ticks_in_current_state(&self) -> u64 {
        self.tick_count - self.state_entry_tick
    }

    fn transition(&mut self, next_id: StateId, ctx: &mut ModeContext) {
        let next_idx = next_id as usize;

        info!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;
        self.state_entry_tick = self.tick_count;
        ctx.ticks_in_state = 0;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
