//! Timer engine driving the balancing loop.
//!
//! The host calls [`Scheduler::tick`] with however many seconds have
//! passed. Due timers are handed to a [`SchedulerDelegate`]; the service
//! implements the delegate by pushing into its event inbox.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Timers                                │
//! │                                                              │
//! │  ┌───────────┐      ┌─────────────┐      ┌────────────────┐  │
//! │  │ Poll      │      │ Rebalance   │      │ Purge          │  │
//! │  │ (mode)    │      │ (in cycle)  │      │ (retention)    │  │
//! │  └─────┬─────┘      └──────┬──────┘      └───────┬────────┘  │
//! │        │                   │                     │           │
//! │        ▼                   ▼                     ▼           │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │              SchedulerDelegate                         │  │
//! │  │       (service pushes into EventInbox)                 │  │
//! │  └───────────────────────┬────────────────────────────────┘  │
//! │                          │                                   │
//! │                          ▼                                   │
//! │                    DabService.tick()                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use log::{debug, info};
use serde::Serialize;

use crate::app::ports::SchedulerDelegate;

// ═══════════════════════════════════════════════════════════════
//  Timer types
// ═══════════════════════════════════════════════════════════════

/// What a timer drives when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Timer {
    /// Mode detection and cycle start/stop.
    Poll,
    /// Mid-cycle feedback and vent re-evaluation.
    Rebalance,
    /// History retention sweep.
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Periodic { interval_secs: u32 },
}

impl TimerKind {
    fn due_after(self) -> f64 {
        match self {
            TimerKind::Periodic { interval_secs } => f64::from(interval_secs.max(1)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// One slot per [`Timer`] variant.
const MAX_TIMERS: usize = 3;

#[derive(Debug, Clone)]
struct TimerEntry {
    timer: Timer,
    kind: TimerKind,
    elapsed_secs: f64,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    slots: [Option<TimerEntry>; MAX_TIMERS],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            slots: [None, None, None],
        }
    }

    /// Arm `timer`, replacing any existing schedule for it. The elapsed
    /// counter restarts from zero.
    pub fn schedule(&mut self, timer: Timer, kind: TimerKind) {
        let entry = TimerEntry {
            timer,
            kind,
            elapsed_secs: 0.0,
        };
        if let Some(slot) = self.slot_of(timer) {
            self.slots[slot] = Some(entry);
        } else if let Some(free) = self.slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(entry);
        }
        info!("Scheduler: armed {:?} as {:?}", timer, kind);
    }

    /// Change a periodic timer's interval, keeping its elapsed time when it
    /// is already armed with the same kind.
    pub fn reschedule(&mut self, timer: Timer, kind: TimerKind) {
        match self.slot_of(timer) {
            Some(slot) => {
                if let Some(entry) = self.slots[slot].as_mut() {
                    if entry.kind != kind {
                        debug!("Scheduler: {:?} {:?} -> {:?}", timer, entry.kind, kind);
                        entry.kind = kind;
                    }
                }
            }
            None => self.schedule(timer, kind),
        }
    }

    pub fn cancel(&mut self, timer: Timer) {
        if let Some(slot) = self.slot_of(timer) {
            self.slots[slot] = None;
            info!("Scheduler: cancelled {:?}", timer);
        }
    }

    pub fn is_armed(&self, timer: Timer) -> bool {
        self.slot_of(timer).is_some()
    }

    pub fn kind_of(&self, timer: Timer) -> Option<TimerKind> {
        self.slot_of(timer)
            .and_then(|s| self.slots[s].as_ref())
            .map(|e| e.kind)
    }

    /// Advance every armed timer by `elapsed_secs`.
    ///
    /// A periodic timer fires at most once per call; any excess beyond one
    /// interval is dropped so a long host pause does not cause a burst.
    pub fn tick(&mut self, elapsed_secs: f64, delegate: &mut dyn SchedulerDelegate) {
        if !(elapsed_secs.is_finite() && elapsed_secs > 0.0) {
            return;
        }

        for slot in self.slots.iter_mut() {
            let Some(entry) = slot else { continue };
            entry.elapsed_secs += elapsed_secs;
            let due = entry.kind.due_after();
            if entry.elapsed_secs < due {
                continue;
            }

            let timer = entry.timer;
            entry.elapsed_secs = (entry.elapsed_secs - due) % due;
            debug!("Scheduler: {:?} fired", timer);
            delegate.on_timer_fired(timer);
        }
    }

    /// Armed timers; reported in diagnostics.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn slot_of(&self, timer: Timer) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|e| e.timer == timer))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
