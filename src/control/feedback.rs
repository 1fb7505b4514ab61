//! Cycle feedback: turn an observed temperature change back into learned
//! rates.
//!
//! At cycle end (or a mid-cycle rebalance) every room's achieved change
//! rate is computed from its start temperature. Valid rates update the
//! room's live efficiency, append a sample to the history store for the
//! hour the cycle began, and raise the global max-rate baseline when they
//! set a new high.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::target::reached_setpoint;
use crate::config::DabConfig;
use crate::error::SampleError;
use crate::history::stats::rolling_average;
use crate::history::{AppendOutcome, HistoryStore};
use crate::model::{HvacMode, RoomId, VentId, minutes_between};
use crate::sensors::snapshot::RoomSnapshot;

// ---------------------------------------------------------------------------
// Rate estimate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InsufficientReason {
    MissingTemperature,
    TooShort,
    VentClosed,
    /// Temperature change within sensor noise.
    NoChange,
    /// Normalised rate below the minimum; treated like no change.
    TooSlow,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RateEstimate {
    Rate(f64),
    InsufficientData(InsufficientReason),
}

/// Normalised change rate for one room over one measurement window.
///
/// The raw °C/min is scaled by the room's best known rate and by how far
/// its vents were open. Anything outside `[min, max]` rate is refused.
pub fn calculate_room_change_rate(
    start_temp: f64,
    current_temp: f64,
    minutes: f64,
    percent_open: f64,
    current_rate: f64,
    config: &DabConfig,
) -> RateEstimate {
    use InsufficientReason::*;

    if !(start_temp.is_finite() && current_temp.is_finite()) {
        return RateEstimate::InsufficientData(MissingTemperature);
    }
    if !(minutes.is_finite() && minutes >= config.min_cycle_minutes) {
        return RateEstimate::InsufficientData(TooShort);
    }
    if !(percent_open.is_finite() && percent_open >= config.min_effective_open_percent) {
        return RateEstimate::InsufficientData(VentClosed);
    }
    let diff = (start_temp - current_temp).abs();
    if diff < config.min_detectable_temp_change_c {
        return RateEstimate::InsufficientData(NoChange);
    }

    let rate = diff / minutes;
    let best = if current_rate.is_finite() { rate.max(current_rate) } else { rate };
    let normalised = (rate / best) / (percent_open.min(100.0) / 100.0);
    if normalised < config.min_temp_change_rate {
        RateEstimate::InsufficientData(TooSlow)
    } else if normalised <= config.max_temp_change_rate {
        RateEstimate::Rate(normalised)
    } else {
        RateEstimate::InsufficientData(OutOfRange)
    }
}

// ---------------------------------------------------------------------------
// Baselines
// ---------------------------------------------------------------------------

/// Learned state that lives outside the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baselines {
    /// Live efficiency per room and mode (presentation + fallback).
    pub efficiencies: BTreeMap<(RoomId, HvacMode), f64>,
    pub max_cooling_rate: f64,
    pub max_heating_rate: f64,
    /// Rolling average of full-cycle durations (minutes).
    pub max_running_minutes: f64,
}

impl Baselines {
    pub fn new(config: &DabConfig) -> Self {
        Self {
            efficiencies: BTreeMap::new(),
            max_cooling_rate: 0.0,
            max_heating_rate: 0.0,
            max_running_minutes: config.max_minutes_to_setpoint,
        }
    }

    pub fn efficiency(&self, room: &RoomId, mode: HvacMode) -> Option<f64> {
        self.efficiencies
            .get(&(room.clone(), mode))
            .copied()
            .filter(|r| *r > 0.0)
    }

    pub fn max_rate(&self, mode: HvacMode) -> Option<f64> {
        let r = match mode {
            HvacMode::Cooling => self.max_cooling_rate,
            HvacMode::Heating => self.max_heating_rate,
            HvacMode::Idle => 0.0,
        };
        (r > 0.0).then_some(r)
    }

    fn raise_max_rate(&mut self, mode: HvacMode, rate: f64) -> bool {
        let slot = match mode {
            HvacMode::Cooling => &mut self.max_cooling_rate,
            HvacMode::Heating => &mut self.max_heating_rate,
            HvacMode::Idle => return false,
        };
        if rate > *slot {
            *slot = rate;
            true
        } else {
            false
        }
    }

    /// Fold a finished cycle's duration into the running-time average.
    pub fn observe_cycle_duration(&mut self, minutes: f64, entries: u32) {
        if minutes.is_finite() && minutes > 0.0 {
            self.max_running_minutes =
                rolling_average(Some(self.max_running_minutes), minutes, 1.0, entries);
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle record
// ---------------------------------------------------------------------------

/// One heating or cooling cycle, from mode transition to its end.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub mode: HvacMode,
    /// Mode transition time; the sample hour comes from here.
    pub started_at_ms: u64,
    /// Start of the current measurement window (reset on rebalance).
    pub cycle_started_at_ms: u64,
    pub finished_at_ms: Option<u64>,
    pub hour: u8,
    pub vents_by_room: BTreeMap<RoomId, Vec<VentId>>,
    pub start_temps: BTreeMap<RoomId, f64>,
    /// Rate each room was seeded with, for the adaptive boost.
    pub predicted: BTreeMap<RoomId, f64>,
}

impl CycleRecord {
    pub fn start(mode: HvacMode, now_ms: u64, hour: u8, snapshot: &RoomSnapshot) -> Self {
        let mut record = Self {
            mode,
            started_at_ms: now_ms,
            cycle_started_at_ms: now_ms,
            finished_at_ms: None,
            hour,
            vents_by_room: snapshot
                .rooms
                .iter()
                .map(|r| (r.room.clone(), r.vents.clone()))
                .collect(),
            start_temps: BTreeMap::new(),
            predicted: BTreeMap::new(),
        };
        record.reset_window(now_ms, snapshot);
        record
    }

    /// Begin a fresh measurement window from the current temperatures.
    pub fn reset_window(&mut self, now_ms: u64, snapshot: &RoomSnapshot) {
        self.cycle_started_at_ms = now_ms;
        self.start_temps = snapshot
            .rooms
            .iter()
            .filter_map(|r| Some((r.room.clone(), r.current_temp?)))
            .collect();
        self.predicted = snapshot
            .rooms
            .iter()
            .filter(|r| r.rate.is_known())
            .map(|r| (r.room.clone(), r.rate.rate))
            .collect();
    }

    pub fn window_minutes(&self, now_ms: u64) -> f64 {
        minutes_between(self.cycle_started_at_ms, now_ms)
    }

    pub fn duration_minutes(&self) -> Option<f64> {
        self.finished_at_ms
            .map(|end| minutes_between(self.started_at_ms, end))
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FeedbackOutcome {
    Learned { rate: f64 },
    /// At setpoint with no change: the prior rate stands.
    PreservedAtSetpoint { rate: Option<f64> },
    /// Vent open, nothing moved: the floor rate is recorded.
    FloorRecorded { rate: f64 },
    Skipped(InsufficientReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomFeedback {
    pub room: RoomId,
    pub outcome: FeedbackOutcome,
    /// Result of the history append, when one was attempted.
    pub appended: Option<Result<AppendOutcome, SampleError>>,
    pub new_max: bool,
}

/// Evaluate one window for every room in the cycle and commit the results.
pub fn record_cycle(
    cycle: &CycleRecord,
    snapshot: &RoomSnapshot,
    global_setpoint: f64,
    history: &mut HistoryStore,
    baselines: &mut Baselines,
    config: &DabConfig,
) -> Vec<RoomFeedback> {
    let now = snapshot.taken_at_ms;
    let minutes = cycle.window_minutes(now);
    let mut results = Vec::with_capacity(cycle.vents_by_room.len());

    for room in cycle.vents_by_room.keys() {
        let state = snapshot.room(room);
        let start = cycle.start_temps.get(room).copied();
        let current = state.and_then(|s| s.current_temp);
        let percent_open = snapshot.room_open_percent(room).unwrap_or(0.0);
        let prior = baselines.efficiency(room, cycle.mode);

        let outcome = match (start, current) {
            (Some(start), Some(current)) => {
                let setpoint = state.and_then(|s| s.setpoint).unwrap_or(global_setpoint);
                let at_setpoint =
                    reached_setpoint(cycle.mode, current, setpoint, config.setpoint_tolerance_c);
                evaluate(start, current, minutes, percent_open, prior, at_setpoint, config)
            }
            _ => FeedbackOutcome::Skipped(InsufficientReason::MissingTemperature),
        };

        let mut feedback = RoomFeedback {
            room: room.clone(),
            outcome,
            appended: None,
            new_max: false,
        };

        let committed = match outcome {
            FeedbackOutcome::Learned { rate } | FeedbackOutcome::FloorRecorded { rate } => rate,
            FeedbackOutcome::PreservedAtSetpoint { .. } | FeedbackOutcome::Skipped(_) => {
                debug!("feedback: {} {:?}", room, outcome);
                results.push(feedback);
                continue;
            }
        };

        let weight = (percent_open / 100.0).clamp(0.0, 1.0);
        let efficiency = rolling_average(prior, committed, weight, config.efficiency_rolling_entries);
        baselines
            .efficiencies
            .insert((room.clone(), cycle.mode), efficiency);
        feedback.appended = Some(history.append(room, cycle.mode, cycle.hour, committed, now));
        feedback.new_max = baselines.raise_max_rate(cycle.mode, committed);
        if let (FeedbackOutcome::Learned { rate }, Some(predicted)) =
            (outcome, cycle.predicted.get(room))
        {
            history.record_outcome(room, cycle.mode, *predicted, rate);
        }
        info!(
            "feedback: {} {} hour {} rate {:.4} efficiency {:.4}{}",
            room,
            cycle.mode,
            cycle.hour,
            committed,
            efficiency,
            if feedback.new_max { " (new max)" } else { "" }
        );
        results.push(feedback);
    }
    results
}

fn evaluate(
    start: f64,
    current: f64,
    minutes: f64,
    percent_open: f64,
    prior: Option<f64>,
    at_setpoint: bool,
    config: &DabConfig,
) -> FeedbackOutcome {
    let estimate = calculate_room_change_rate(
        start,
        current,
        minutes,
        percent_open,
        prior.unwrap_or(0.0),
        config,
    );
    use InsufficientReason::{NoChange, TooSlow};

    // Reaching this arm means the vent passed the open check.
    match estimate {
        RateEstimate::Rate(rate) => FeedbackOutcome::Learned { rate },
        RateEstimate::InsufficientData(NoChange | TooSlow) if at_setpoint => {
            FeedbackOutcome::PreservedAtSetpoint { rate: prior }
        }
        RateEstimate::InsufficientData(NoChange | TooSlow) => FeedbackOutcome::FloorRecorded {
            rate: config.min_temp_change_rate,
        },
        RateEstimate::InsufficientData(reason) => FeedbackOutcome::Skipped(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryParams;
    use crate::sensors::snapshot::{LearnedRate, RoomState, VentReading};

    const T0: u64 = 1_700_000_000_000;
    const MIN: u64 = 60_000;

    fn cfg() -> DabConfig {
        DabConfig::default()
    }

    #[test]
    fn short_cycle_is_insufficient() {
        let r = calculate_room_change_rate(25.0, 23.0, 2.0, 100.0, 0.0, &cfg());
        assert_eq!(r, RateEstimate::InsufficientData(InsufficientReason::TooShort));
    }

    #[test]
    fn closed_vent_is_insufficient() {
        let r = calculate_room_change_rate(25.0, 23.0, 20.0, 1.0, 0.0, &cfg());
        assert_eq!(r, RateEstimate::InsufficientData(InsufficientReason::VentClosed));
    }

    #[test]
    fn noise_level_change_is_insufficient() {
        let r = calculate_room_change_rate(25.0, 24.95, 20.0, 100.0, 0.0, &cfg());
        assert_eq!(r, RateEstimate::InsufficientData(InsufficientReason::NoChange));
    }

    #[test]
    fn first_full_open_cycle_learns_unit_rate() {
        let r = calculate_room_change_rate(25.0, 23.0, 20.0, 100.0, 0.0, &cfg());
        assert_eq!(r, RateEstimate::Rate(1.0));
    }

    #[test]
    fn slower_than_best_scales_down() {
        // 0.1 °C/min against a best of 0.2, fully open.
        let r = calculate_room_change_rate(25.0, 23.0, 20.0, 100.0, 0.2, &cfg());
        assert_eq!(r, RateEstimate::Rate(0.5));
    }

    fn snapshot(now: u64, temp: Option<f64>, open: u8) -> RoomSnapshot {
        let room = RoomId::new("den");
        let vent = VentId::new("den-1");
        RoomSnapshot {
            taken_at_ms: now,
            rooms: vec![RoomState {
                room: room.clone(),
                vents: vec![vent.clone()],
                vent_weights: vec![1.0],
                active: true,
                current_temp: temp,
                setpoint: Some(22.0),
                rate: LearnedRate::unknown(),
            }],
            vents: vec![VentReading {
                vent,
                room,
                room_temp: temp,
                duct_temp: None,
                open_percent: open,
                weight: 1.0,
            }],
        }
    }

    #[test]
    fn cycle_commits_sample_efficiency_and_max() {
        let c = cfg();
        let mut history = HistoryStore::new(HistoryParams::from(&c));
        let mut baselines = Baselines::new(&c);
        let cycle = CycleRecord::start(HvacMode::Cooling, T0, 14, &snapshot(T0, Some(26.0), 100));
        let end = snapshot(T0 + 20 * MIN, Some(24.0), 100);

        let out = record_cycle(&cycle, &end, 22.0, &mut history, &mut baselines, &c);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].outcome, FeedbackOutcome::Learned { rate: 1.0 });
        assert!(out[0].new_max);
        let den = RoomId::new("den");
        assert_eq!(history.samples(&den, HvacMode::Cooling, 14).len(), 1);
        assert_eq!(baselines.efficiency(&den, HvacMode::Cooling), Some(1.0));
        assert_eq!(baselines.max_rate(HvacMode::Cooling), Some(1.0));
    }

    #[test]
    fn stalled_open_vent_records_floor() {
        let c = cfg();
        let mut history = HistoryStore::new(HistoryParams::from(&c));
        let mut baselines = Baselines::new(&c);
        let cycle = CycleRecord::start(HvacMode::Cooling, T0, 3, &snapshot(T0, Some(26.0), 80));
        let end = snapshot(T0 + 30 * MIN, Some(26.0), 80);

        let out = record_cycle(&cycle, &end, 22.0, &mut history, &mut baselines, &c);
        assert_eq!(
            out[0].outcome,
            FeedbackOutcome::FloorRecorded { rate: c.min_temp_change_rate }
        );
        assert!(history.lookup(&RoomId::new("den"), HvacMode::Cooling, 3).is_learned());
    }

    #[test]
    fn room_at_setpoint_keeps_prior_rate() {
        let c = cfg();
        let mut history = HistoryStore::new(HistoryParams::from(&c));
        let mut baselines = Baselines::new(&c);
        let den = RoomId::new("den");
        baselines.efficiencies.insert((den.clone(), HvacMode::Cooling), 0.4);
        let cycle = CycleRecord::start(HvacMode::Cooling, T0, 3, &snapshot(T0, Some(21.5), 80));
        let end = snapshot(T0 + 30 * MIN, Some(21.5), 80);

        let out = record_cycle(&cycle, &end, 22.0, &mut history, &mut baselines, &c);
        assert_eq!(
            out[0].outcome,
            FeedbackOutcome::PreservedAtSetpoint { rate: Some(0.4) }
        );
        assert!(history.is_empty());
        assert_eq!(baselines.efficiency(&den, HvacMode::Cooling), Some(0.4));
    }

    #[test]
    fn missing_end_temperature_is_skipped() {
        let c = cfg();
        let mut history = HistoryStore::new(HistoryParams::from(&c));
        let mut baselines = Baselines::new(&c);
        let cycle = CycleRecord::start(HvacMode::Heating, T0, 3, &snapshot(T0, Some(18.0), 80));
        let end = snapshot(T0 + 30 * MIN, None, 80);
        let out = record_cycle(&cycle, &end, 22.0, &mut history, &mut baselines, &c);
        assert_eq!(
            out[0].outcome,
            FeedbackOutcome::Skipped(InsufficientReason::MissingTemperature)
        );
    }

    #[test]
    fn barely_open_vent_without_change_records_floor() {
        let c = cfg();
        let mut history = HistoryStore::new(HistoryParams::from(&c));
        let mut baselines = Baselines::new(&c);
        let den = RoomId::new("den");
        baselines.efficiencies.insert((den.clone(), HvacMode::Cooling), 0.9);
        let cycle = CycleRecord::start(HvacMode::Cooling, T0, 3, &snapshot(T0, Some(26.0), 20));
        let end = snapshot(T0 + 40 * MIN, Some(26.0), 20);

        let out = record_cycle(&cycle, &end, 22.0, &mut history, &mut baselines, &c);
        assert_eq!(
            out[0].outcome,
            FeedbackOutcome::FloorRecorded { rate: c.min_temp_change_rate }
        );
        assert_eq!(history.len(), 1);
        assert!(baselines.efficiency(&den, HvacMode::Cooling) < Some(0.9));
    }

    #[test]
    fn rate_below_minimum_records_floor() {
        let c = cfg();
        // 0.15 °C over 40 min against a best of 5.0 normalises below the minimum.
        assert_eq!(
            calculate_room_change_rate(26.0, 25.85, 40.0, 100.0, 5.0, &c),
            RateEstimate::InsufficientData(InsufficientReason::TooSlow)
        );

        let mut history = HistoryStore::new(HistoryParams::from(&c));
        let mut baselines = Baselines::new(&c);
        let den = RoomId::new("den");
        baselines.efficiencies.insert((den.clone(), HvacMode::Cooling), 5.0);
        let cycle = CycleRecord::start(HvacMode::Cooling, T0, 3, &snapshot(T0, Some(26.0), 100));
        let end = snapshot(T0 + 40 * MIN, Some(25.85), 100);

        let out = record_cycle(&cycle, &end, 22.0, &mut history, &mut baselines, &c);
        assert_eq!(
            out[0].outcome,
            FeedbackOutcome::FloorRecorded { rate: c.min_temp_change_rate }
        );
    }

    #[test]
    fn slow_room_at_setpoint_keeps_prior_rate() {
        let c = cfg();
        let mut history = HistoryStore::new(HistoryParams::from(&c));
        let mut baselines = Baselines::new(&c);
        let den = RoomId::new("den");
        baselines.efficiencies.insert((den.clone(), HvacMode::Cooling), 5.0);
        let cycle = CycleRecord::start(HvacMode::Cooling, T0, 3, &snapshot(T0, Some(21.95), 100));
        let end = snapshot(T0 + 40 * MIN, Some(21.8), 100);

        let out = record_cycle(&cycle, &end, 22.0, &mut history, &mut baselines, &c);
        assert_eq!(
            out[0].outcome,
            FeedbackOutcome::PreservedAtSetpoint { rate: Some(5.0) }
        );
        assert!(history.is_empty());
    }

    #[test]
    fn running_time_average_moves_toward_observed() {
        let c = cfg();
        let mut b = Baselines::new(&c);
        b.observe_cycle_duration(30.0, 6);
        assert!(b.max_running_minutes < 60.0 && b.max_running_minutes > 30.0);
    }
}
