//! Target opening calculator.
//!
//! Estimates how long each room needs to reach its setpoint at its learned
//! rate, takes the slowest room as the cycle horizon, then maps the rate
//! every other room needs to hit that same horizon onto an opening:
//!
//! > percent = BASE × exp((target_rate / learned_rate) × EXP) × 100
//!
//! clamped to `[floor, 100]`. A room that needs its full learned rate sits
//! near 100%; a room that can afford to go slowly drops toward the floor.

use log::{debug, warn};
use serde::Serialize;

use crate::config::DabConfig;
use crate::history::stats;
use crate::model::{HvacMode, RoomId};
use crate::sensors::snapshot::{LearnedRate, RoomState};

/// Where the global setpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SetpointSource {
    Thermostat,
    MedianOfRooms,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetReason {
    Inactive,
    ReachedSetpoint,
    /// No reliable rate; unknown efficiency gets full airflow.
    UnknownRate,
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HoldReason {
    MissingTemperature,
    NoVents,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RoomTarget {
    Set { percent: f64, reason: TargetReason },
    /// Leave the room's vents where they are.
    Hold(HoldReason),
}

impl RoomTarget {
    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::Set { percent, .. } => Some(*percent),
            Self::Hold(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomDecision {
    pub room: RoomId,
    pub current_temp: Option<f64>,
    pub setpoint: f64,
    pub rate: LearnedRate,
    pub minutes_to_target: Option<f64>,
    pub target: RoomTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetPlan {
    pub mode: HvacMode,
    pub global_setpoint: f64,
    pub setpoint_source: SetpointSource,
    pub longest_minutes: f64,
    pub decisions: Vec<RoomDecision>,
}

impl TargetPlan {
    pub fn decision(&self, room: &RoomId) -> Option<&RoomDecision> {
        self.decisions.iter().find(|d| &d.room == room)
    }
}

/// Thermostat setpoint → median of room setpoints → configured default.
pub fn resolve_setpoint(
    rooms: &[RoomState],
    thermostat: Option<f64>,
    mode: HvacMode,
    config: &DabConfig,
) -> (f64, SetpointSource) {
    if let Some(sp) = thermostat.filter(|s| s.is_finite()) {
        return (sp, SetpointSource::Thermostat);
    }
    let setpoints: Vec<f64> = rooms.iter().filter_map(|r| r.setpoint).collect();
    match stats::median(&setpoints) {
        Some(sp) => (sp, SetpointSource::MedianOfRooms),
        None => (config.default_setpoint(mode), SetpointSource::Default),
    }
}

/// Whether `temp` is at or past `setpoint` for `mode`, within `tolerance`.
pub fn reached_setpoint(mode: HvacMode, temp: f64, setpoint: f64, tolerance: f64) -> bool {
    match mode {
        HvacMode::Cooling => temp - setpoint <= tolerance,
        HvacMode::Heating => setpoint - temp <= tolerance,
        HvacMode::Idle => true,
    }
}

/// Map a required rate onto an opening in `[floor, 100]`.
pub fn exponential_open_percent(
    target_rate: f64,
    learned_rate: f64,
    floor: f64,
    config: &DabConfig,
) -> f64 {
    if !(learned_rate > 0.0 && target_rate.is_finite()) {
        return 100.0;
    }
    let pct = config.base_const * ((target_rate / learned_rate) * config.exp_const).exp() * 100.0;
    if pct.is_finite() { pct.clamp(floor, 100.0) } else { 100.0 }
}

fn usable_rate(rate: &LearnedRate, config: &DabConfig) -> Option<f64> {
    (rate.is_known() && rate.rate >= config.min_temp_change_rate).then_some(rate.rate)
}

/// Compute every room's raw target for one evaluation.
///
/// `max_running_minutes` is the rolling average of past full-cycle
/// durations; per-room estimates are capped at it.
pub fn compute_targets(
    rooms: &[RoomState],
    mode: HvacMode,
    thermostat_setpoint: Option<f64>,
    max_running_minutes: f64,
    config: &DabConfig,
) -> TargetPlan {
    let (global_setpoint, setpoint_source) =
        resolve_setpoint(rooms, thermostat_setpoint, mode, config);
    let floor = config.min_open_percent.clamp(0.0, 100.0);
    let cap = if max_running_minutes.is_finite() && max_running_minutes > 0.0 {
        max_running_minutes
    } else {
        config.max_minutes_to_setpoint
    };
    let closes = |r: &RoomState| !r.active && config.close_inactive_rooms;

    // Pass 1: minutes-to-target per room and the cycle horizon.
    let minutes: Vec<Option<f64>> = rooms
        .iter()
        .map(|r| {
            let temp = r.current_temp?;
            if closes(r) || r.vents.is_empty() {
                return None;
            }
            let sp = r.setpoint.unwrap_or(global_setpoint);
            if reached_setpoint(mode, temp, sp, config.setpoint_tolerance_c) {
                return None;
            }
            let rate = usable_rate(&r.rate, config)?;
            let raw = (sp - temp).abs() / rate;
            if raw > cap {
                warn!(
                    "target: {} needs {:.0} min at rate {:.4}; capped at {:.0}",
                    r.room, raw, rate, cap
                );
            }
            Some(raw.min(cap))
        })
        .collect();
    let longest_minutes = minutes.iter().flatten().copied().fold(0.0, f64::max);

    // Pass 2: openings.
    let decisions = rooms
        .iter()
        .zip(&minutes)
        .map(|(r, minutes_to_target)| {
            let setpoint = r.setpoint.unwrap_or(global_setpoint);
            let target = room_target(r, mode, setpoint, longest_minutes, floor, config);
            debug!(
                "target: {} temp={:?} sp={:.1} rate={:.4} -> {:?}",
                r.room, r.current_temp, setpoint, r.rate.rate, target
            );
            RoomDecision {
                room: r.room.clone(),
                current_temp: r.current_temp,
                setpoint,
                rate: r.rate,
                minutes_to_target: *minutes_to_target,
                target,
            }
        })
        .collect();

    TargetPlan {
        mode,
        global_setpoint,
        setpoint_source,
        longest_minutes,
        decisions,
    }
}

fn room_target(
    r: &RoomState,
    mode: HvacMode,
    setpoint: f64,
    longest_minutes: f64,
    floor: f64,
    config: &DabConfig,
) -> RoomTarget {
    if r.vents.is_empty() {
        return RoomTarget::Hold(HoldReason::NoVents);
    }
    if !r.active && config.close_inactive_rooms {
        return RoomTarget::Set {
            percent: floor,
            reason: TargetReason::Inactive,
        };
    }
    let Some(temp) = r.current_temp else {
        return RoomTarget::Hold(HoldReason::MissingTemperature);
    };
    if reached_setpoint(mode, temp, setpoint, config.setpoint_tolerance_c) {
        return RoomTarget::Set {
            percent: floor,
            reason: TargetReason::ReachedSetpoint,
        };
    }
    let Some(rate) = usable_rate(&r.rate, config) else {
        return RoomTarget::Set {
            percent: 100.0,
            reason: TargetReason::UnknownRate,
        };
    };
    if longest_minutes <= 0.0 {
        return RoomTarget::Set {
            percent: 100.0,
            reason: TargetReason::Computed,
        };
    }
    let target_rate = (setpoint - temp).abs() / longest_minutes;
    RoomTarget::Set {
        percent: exponential_open_percent(target_rate, rate, floor, config),
        reason: TargetReason::Computed,
    }
}
