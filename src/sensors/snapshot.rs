//! Typed per-evaluation snapshot of every room and vent.
//!
//! Built once per evaluation from the [`DeviceDirectory`]; the engine never
//! queries the directory again mid-computation. Missing readings stay
//! `None` all the way through; nothing is zero-filled.

use serde::Serialize;

use crate::app::ports::DeviceDirectory;
use crate::history::RateSource;
use crate::model::{RoomId, VentId};

/// Where the rate used for a room came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RateOrigin {
    History(RateSource),
    /// The room's live efficiency value.
    LiveEfficiency,
    /// Global max-rate baseline for the mode.
    GlobalMax,
    /// Nothing known; the calculator opens such rooms fully.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LearnedRate {
    pub rate: f64,
    pub origin: RateOrigin,
}

impl LearnedRate {
    pub fn unknown() -> Self {
        Self {
            rate: 0.0,
            origin: RateOrigin::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        self.origin != RateOrigin::Unknown && self.rate.is_finite() && self.rate > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VentReading {
    pub vent: VentId,
    pub room: RoomId,
    pub room_temp: Option<f64>,
    pub duct_temp: Option<f64>,
    pub open_percent: u8,
    pub weight: f64,
}

impl VentReading {
    /// `duct − room`, when both are available.
    pub fn delta(&self) -> Option<f64> {
        Some(self.duct_temp? - self.room_temp?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub room: RoomId,
    pub vents: Vec<VentId>,
    /// One weight per vent, same order as `vents`.
    pub vent_weights: Vec<f64>,
    pub active: bool,
    pub current_temp: Option<f64>,
    pub setpoint: Option<f64>,
    /// Filled in by the service once the mode is known.
    pub rate: LearnedRate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSnapshot {
    pub taken_at_ms: u64,
    pub rooms: Vec<RoomState>,
    pub vents: Vec<VentReading>,
}

impl RoomSnapshot {
    /// Read every room and vent from the directory.
    pub fn capture(directory: &impl DeviceDirectory, now_ms: u64) -> Self {
        let mut rooms = Vec::new();
        let mut vents = Vec::new();

        for desc in directory.rooms() {
            let weights = normalise_weights(desc.vent_weights.as_deref(), desc.vents.len());
            let mut temps = Vec::with_capacity(desc.vents.len());

            for (vent, weight) in desc.vents.iter().zip(&weights) {
                let room_temp = directory.room_temperature(vent).filter(|t| t.is_finite());
                let duct_temp = directory.duct_temperature(vent).filter(|t| t.is_finite());
                if let Some(t) = room_temp {
                    temps.push(t);
                }
                vents.push(VentReading {
                    vent: vent.clone(),
                    room: desc.room.clone(),
                    room_temp,
                    duct_temp,
                    open_percent: directory.current_open_percent(vent).min(100),
                    weight: *weight,
                });
            }

            let current_temp = if temps.is_empty() {
                None
            } else {
                Some(temps.iter().sum::<f64>() / temps.len() as f64)
            };

            rooms.push(RoomState {
                active: directory.is_room_active(&desc.room),
                setpoint: directory.setpoint(&desc.room).filter(|s| s.is_finite()),
                room: desc.room,
                vents: desc.vents,
                vent_weights: weights,
                current_temp,
                rate: LearnedRate::unknown(),
            });
        }

        Self {
            taken_at_ms: now_ms,
            rooms,
            vents,
        }
    }

    pub fn room(&self, room: &RoomId) -> Option<&RoomState> {
        self.rooms.iter().find(|r| &r.room == room)
    }

    pub fn vent(&self, vent: &VentId) -> Option<&VentReading> {
        self.vents.iter().find(|v| &v.vent == vent)
    }

    /// Weighted mean opening of a room's vents.
    pub fn room_open_percent(&self, room: &RoomId) -> Option<f64> {
        let (sum, weight) = self
            .vents
            .iter()
            .filter(|v| &v.room == room)
            .fold((0.0, 0.0), |(s, w), v| {
                (s + f64::from(v.open_percent) * v.weight, w + v.weight)
            });
        (weight > 0.0).then(|| sum / weight)
    }
}

fn normalise_weights(weights: Option<&[f64]>, count: usize) -> Vec<f64> {
    match weights {
        Some(w) if w.len() == count => w
            .iter()
            .map(|x| if x.is_finite() && *x > 0.0 { *x } else { 1.0 })
            .collect(),
        _ => vec![1.0; count],
    }
}
