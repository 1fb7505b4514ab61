//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every engine event as one
//! structured line through the `log` facade. A hub-event or dashboard
//! adapter would implement the same trait.

use log::{info, warn};

use crate::app::events::EngineEvent;
use crate::app::ports::EventSink;

#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Started(mode) => {
                info!("START | mode={}", mode);
            }
            EngineEvent::ModeChanged { from, to, reason } => {
                info!("MODE | {} -> {} | reason={:?}", from, to, reason);
            }
            EngineEvent::CycleStarted { mode, hour, rooms } => {
                info!("CYCLE | start {} | hour={} | rooms={}", mode, hour, rooms);
            }
            EngineEvent::CycleFinished {
                mode,
                minutes,
                learned,
            } => {
                info!(
                    "CYCLE | finish {} | {:.1} min | learned={}",
                    mode, minutes, learned
                );
            }
            EngineEvent::Rebalanced { mode, learned } => {
                info!("CYCLE | rebalance {} | learned={}", mode, learned);
            }
            EngineEvent::VentCommanded {
                vent,
                room,
                percent,
            } => {
                info!("VENT | {} ({}) -> {}%", vent, room, percent);
            }
            EngineEvent::SampleRejected { room, reason } => {
                warn!("HIST | rejected sample for {}: {}", room, reason);
            }
            EngineEvent::AnomalyFlagged { room, mode, hour } => {
                warn!("HIST | anomaly {} {} hour={}", room, mode, hour);
            }
            EngineEvent::AirflowRaised {
                before,
                after,
                satisfied,
            } => {
                info!(
                    "FLOW | combined {:.1}% -> {:.1}% | satisfied={}",
                    before, after, satisfied
                );
            }
            EngineEvent::HistoryPurged { removed } => {
                info!("HIST | purged {} samples", removed);
            }
            EngineEvent::PersistFailed => {
                warn!("HIST | persist failed");
            }
        }
    }
}
