//! Engine inbox.
//!
//! Events are produced by:
//! - the scheduler (poll, rebalance and purge timers)
//! - the host (a vent reported a fresh reading)
//! - commands (end the running cycle now)
//!
//! Events are consumed by [`DabService`](crate::app::service::DabService)
//! one at a time in FIFO order. Re-entrant triggers only enqueue, so a
//! burst of readings never runs the pipeline concurrently with itself.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Scheduler   │────▶│              │     │              │
//! │ Host        │────▶│  EventInbox  │────▶│  DabService  │
//! │ Commands    │────▶│  (bounded)   │     │  (consumer)  │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```

use heapless::Deque;
use log::warn;

use crate::app::ports::SchedulerDelegate;
use crate::model::VentId;
use crate::scheduler::Timer;

/// Maximum number of pending events.
pub const INBOX_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TimerFired(Timer),
    /// A vent reported new temperatures; feeds the trend tracker.
    ReadingUpdated { vent: VentId },
    /// Close the running cycle now and record its feedback.
    CycleEnded,
}

/// Bounded FIFO of pending [`Event`]s.
///
/// Identical pending events are coalesced: a second `Poll` queued before
/// the first one ran adds nothing.
pub struct EventInbox {
    queue: Deque<Event, INBOX_CAPACITY>,
    dropped: u32,
}

impl Default for EventInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl EventInbox {
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
            dropped: 0,
        }
    }

    /// Queue `event`. Returns `false` if the inbox was full and the event
    /// was dropped.
    pub fn push(&mut self, event: Event) -> bool {
        if self.queue.iter().any(|e| *e == event) {
            return true;
        }
        match self.queue.push_back(event) {
            Ok(()) => true,
            Err(event) => {
                self.dropped = self.dropped.saturating_add(1);
                warn!("EventInbox: full, dropped {:?}", event);
                false
            }
        }
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Drain all pending events into a callback, FIFO.
    pub fn drain(&mut self, mut handler: impl FnMut(Event)) {
        while let Some(event) = self.pop() {
            handler(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Events lost to overflow since construction.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl SchedulerDelegate for EventInbox {
    fn on_timer_fired(&mut self, timer: Timer) {
        self.push(Event::TimerFired(timer));
    }
}
