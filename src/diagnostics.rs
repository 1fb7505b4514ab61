//! Decision trace and learned-rate diagnostics.
//!
//! The service records every room decision into a fixed-size ring so the
//! last few evaluations can be explained after the fact. A
//! [`DiagnosticsSnapshot`] bundles that ring with the full hour-of-day
//! rate table and the live baselines, and renders as JSON or CSV for a
//! settings page or a support export.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use heapless::HistoryBuffer;
use serde::Serialize;

use crate::control::feedback::Baselines;
use crate::control::target::{RoomTarget, TargetPlan};
use crate::history::{HistoryStore, RateSource};
use crate::model::{HOURS_PER_DAY, HvacMode, RoomId};
use crate::sensors::snapshot::RateOrigin;

/// Decisions kept in the trace ring.
pub const TRACE_CAPACITY: usize = 64;

const CSV_HEADER: &str = "room,mode,hour,rate,source,sample_count,anomaly_flag,carry_forward_used";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub at_ms: u64,
    pub room: RoomId,
    pub mode: HvacMode,
    pub current_temp: Option<f64>,
    pub setpoint: f64,
    pub rate: f64,
    pub rate_origin: RateOrigin,
    pub minutes_to_target: Option<f64>,
    pub target: RoomTarget,
}

/// Ring of the most recent [`DecisionRecord`]s; oldest are overwritten.
pub struct DecisionTrace {
    ring: HistoryBuffer<DecisionRecord, TRACE_CAPACITY>,
}

impl Default for DecisionTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTrace {
    pub fn new() -> Self {
        Self {
            ring: HistoryBuffer::new(),
        }
    }

    pub fn record(&mut self, record: DecisionRecord) {
        self.ring.write(record);
    }

    /// Record every room decision of one evaluation.
    pub fn record_plan(&mut self, at_ms: u64, plan: &TargetPlan) {
        for d in &plan.decisions {
            self.record(DecisionRecord {
                at_ms,
                room: d.room.clone(),
                mode: plan.mode,
                current_temp: d.current_temp,
                setpoint: d.setpoint,
                rate: d.rate.rate,
                rate_origin: d.rate.origin,
                minutes_to_target: d.minutes_to_target,
                target: d.target,
            });
        }
    }

    /// Oldest first.
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.ring.oldest_ordered().cloned().collect()
    }

    pub fn latest(&self) -> Option<&DecisionRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

/// One cell of the hour-of-day rate table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateRow {
    pub room: RoomId,
    pub mode: HvacMode,
    pub hour: u8,
    pub rate: f64,
    pub source: RateSource,
    pub sample_count: usize,
    pub anomaly_flag: bool,
    pub carry_forward_used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EfficiencyRow {
    pub room: RoomId,
    pub mode: HvacMode,
    pub efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub collected_at_ms: u64,
    pub mode: HvacMode,
    pub stored_samples: usize,
    pub max_cooling_rate: f64,
    pub max_heating_rate: f64,
    pub max_running_minutes: f64,
    /// Timers currently armed in the scheduler.
    pub armed_timers: usize,
    /// Events lost to inbox overflow.
    pub inbox_dropped: u32,
    pub efficiencies: Vec<EfficiencyRow>,
    pub rates: Vec<RateRow>,
    pub decisions: Vec<DecisionRecord>,
}

impl DiagnosticsSnapshot {
    /// Gather diagnostics for `rooms` plus every room the history knows.
    pub fn collect(
        collected_at_ms: u64,
        mode: HvacMode,
        rooms: &[RoomId],
        trace: &DecisionTrace,
        history: &HistoryStore,
        baselines: &Baselines,
    ) -> Self {
        let mut all_rooms = history.rooms();
        all_rooms.extend(rooms.iter().cloned());
        all_rooms.sort();
        all_rooms.dedup();

        let mut rates = Vec::with_capacity(all_rooms.len() * 2 * usize::from(HOURS_PER_DAY));
        for room in &all_rooms {
            for mode in HvacMode::ACTIVE {
                for hour in 0..HOURS_PER_DAY {
                    let lookup = history.lookup(room, mode, hour);
                    rates.push(RateRow {
                        room: room.clone(),
                        mode,
                        hour,
                        rate: lookup.rate,
                        source: lookup.source,
                        sample_count: lookup.sample_count,
                        anomaly_flag: lookup.anomaly,
                        carry_forward_used: lookup.carry_forward_used(),
                    });
                }
            }
        }

        let efficiencies = baselines
            .efficiencies
            .iter()
            .map(|((room, mode), efficiency)| EfficiencyRow {
                room: room.clone(),
                mode: *mode,
                efficiency: *efficiency,
            })
            .collect();

        Self {
            collected_at_ms,
            mode,
            stored_samples: history.len(),
            max_cooling_rate: baselines.max_cooling_rate,
            max_heating_rate: baselines.max_heating_rate,
            max_running_minutes: baselines.max_running_minutes,
            armed_timers: 0,
            inbox_dropped: 0,
            efficiencies,
            rates,
            decisions: trace.records(),
        }
    }

    /// Attach the event loop's queue counters.
    pub fn with_queue_health(mut self, armed_timers: usize, inbox_dropped: u32) -> Self {
        self.armed_timers = armed_timers;
        self.inbox_dropped = inbox_dropped;
        self
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize diagnostics snapshot")
    }

    /// The rate table as CSV, one row per room, mode and hour.
    pub fn to_csv(&self) -> Result<String> {
        let mut out = String::with_capacity(64 * (self.rates.len() + 1));
        writeln!(out, "{CSV_HEADER}").context("write csv header")?;
        for row in &self.rates {
            writeln!(
                out,
                "{},{},{},{:.6},{},{},{},{}",
                csv_field(row.room.as_str()),
                row.mode,
                row.hour,
                row.rate,
                source_label(row.source),
                row.sample_count,
                row.anomaly_flag,
                row.carry_forward_used
            )
            .with_context(|| format!("write csv row for {} hour {}", row.room, row.hour))?;
        }
        Ok(out)
    }
}

fn source_label(source: RateSource) -> &'static str {
    match source {
        RateSource::Ewma => "ewma",
        RateSource::Mean => "mean",
        RateSource::CarryForward { .. } => "carry_forward",
        RateSource::Floor => "floor",
    }
}

/// Quote a field when it holds a delimiter, quote or newline.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_owned()
    }
}
