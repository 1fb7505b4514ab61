//! Outbound engine events.
//!
//! The [`DabService`](super::service::DabService) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters decide what to do
//! with them: log lines, a hub event stream, a dashboard.

use serde::Serialize;

use crate::control::mode::ModeReason;
use crate::error::SampleError;
use crate::model::{HvacMode, RoomId, VentId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEvent {
    /// The service started; carries the initial mode.
    Started(HvacMode),

    ModeChanged {
        from: HvacMode,
        to: HvacMode,
        reason: ModeReason,
    },

    CycleStarted {
        mode: HvacMode,
        hour: u8,
        rooms: usize,
    },

    /// A cycle closed and its feedback was recorded.
    CycleFinished {
        mode: HvacMode,
        minutes: f64,
        learned: usize,
    },

    /// Mid-cycle feedback pass.
    Rebalanced { mode: HvacMode, learned: usize },

    VentCommanded {
        vent: VentId,
        room: RoomId,
        percent: u8,
    },

    /// The history store refused a learned sample.
    SampleRejected { room: RoomId, reason: SampleError },

    /// A new sample was an outlier and its influence is being dampened.
    AnomalyFlagged {
        room: RoomId,
        mode: HvacMode,
        hour: u8,
    },

    /// The minimum-airflow enforcer raised openings.
    AirflowRaised {
        before: f64,
        after: f64,
        satisfied: bool,
    },

    HistoryPurged { removed: usize },

    /// Persisting learned state failed; the in-memory state is intact.
    PersistFailed,
}
