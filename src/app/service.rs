//! Balancing service: the hexagonal core.
//!
//! [`DabService`] owns the learned state (history store, baselines), the
//! mode FSM, the timer table and the event inbox. All I/O flows through
//! port traits injected at call sites, so the whole service runs against
//! mock adapters in tests.
//!
//! ```text
//!  DeviceDirectory ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                      │          DabService          │
//!    VentActuator ◀────│ FSM · History · Control      │
//!                      │ Scheduler · EventInbox       │
//!           Clock ───▶ └──────────────────────────────┘ ◀─▶ StoragePort
//! ```
//!
//! Every entry point only enqueues; [`DabService::run_pending`] then
//! drains the inbox one event at a time, run-to-completion.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::config::DabConfig;
use crate::control::airflow::{VentTarget, enforce_minimum_airflow};
use crate::control::dampener::dampen;
use crate::control::feedback::{Baselines, CycleRecord, record_cycle};
use crate::control::mode::detect_mode;
use crate::control::target::{compute_targets, reached_setpoint, resolve_setpoint};
use crate::diagnostics::{DecisionTrace, DiagnosticsSnapshot};
use crate::error::{Error, Result};
use crate::events::{Event, EventInbox};
use crate::fsm::context::ModeContext;
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::history::persist::{self, HISTORY_NAMESPACE};
use crate::history::{AppendOutcome, HistoryParams, HistoryStore};
use crate::model::{HvacMode, RoomId, VentId};
use crate::scheduler::{Scheduler, Timer, TimerKind};
use crate::sensors::snapshot::{LearnedRate, RateOrigin, RoomSnapshot};
use crate::sensors::trend::TrendTracker;

use super::commands::DabCommand;
use super::events::EngineEvent;
use super::ports::{Clock, ConfigPort, DeviceDirectory, EventSink, StorageError, StoragePort, VentActuator};

/// Storage key for [`Baselines`], beside the history blob.
pub const BASELINES_KEY: &str = "baselines";

const SECS_PER_MINUTE: u32 = 60;
const SECS_PER_HOUR: u32 = 3600;

fn periodic(interval_secs: u32) -> TimerKind {
    TimerKind::Periodic { interval_secs }
}

// ───────────────────────────────────────────────────────────────
// DabService
// ───────────────────────────────────────────────────────────────

pub struct DabService {
    config: DabConfig,
    history: HistoryStore,
    baselines: Baselines,
    trend: TrendTracker,
    fsm: Fsm,
    ctx: ModeContext,
    cycle: Option<CycleRecord>,
    scheduler: Scheduler,
    inbox: EventInbox,
    trace: DecisionTrace,
    /// Rooms seen in the most recent snapshot.
    known_rooms: Vec<RoomId>,
    config_dirty: bool,
    state_dirty: bool,
}

impl DabService {
    /// Empty learned state. Does not arm any timer; call [`start`](Self::start).
    pub fn new(config: DabConfig) -> Self {
        let history = HistoryStore::new(HistoryParams::from(&config));
        let baselines = Baselines::new(&config);
        Self::with_state(config, history, baselines)
    }

    pub fn with_state(config: DabConfig, history: HistoryStore, baselines: Baselines) -> Self {
        let trend = TrendTracker::new(config.trend_window_minutes, config.trend_min_delta_c);
        Self {
            config,
            history,
            baselines,
            trend,
            fsm: Fsm::new(build_state_table(), StateId::Idle),
            ctx: ModeContext::new(),
            cycle: None,
            scheduler: Scheduler::new(),
            inbox: EventInbox::new(),
            trace: DecisionTrace::new(),
            known_rooms: Vec::new(),
            config_dirty: false,
            state_dirty: false,
        }
    }

    /// Load learned state from `storage`. Missing or unreadable blobs
    /// are logged and replaced with empty state.
    pub fn restore(config: DabConfig, storage: &impl StoragePort) -> Self {
        let params = HistoryParams::from(&config);
        let history = HistoryStore::load(storage, params).unwrap_or_else(|e| {
            warn!("DabService: history not restored ({}), starting empty", e);
            HistoryStore::new(params)
        });
        let baselines = match load_baselines(storage) {
            Ok(Some(b)) => b,
            Ok(None) => Baselines::new(&config),
            Err(e) => {
                warn!("DabService: baselines not restored ({}), starting fresh", e);
                Baselines::new(&config)
            }
        };
        info!(
            "DabService: restored {} samples, {} efficiencies",
            history.len(),
            baselines.efficiencies.len()
        );
        Self::with_state(config, history, baselines)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Arm the poll and purge timers and queue an immediate poll.
    pub fn start(&mut self, sink: &mut impl EventSink) {
        self.fsm.start(&mut self.ctx);
        self.scheduler
            .schedule(Timer::Poll, periodic(self.config.poll_idle_secs));
        self.scheduler.schedule(
            Timer::Purge,
            periodic(self.config.purge_interval_hours.saturating_mul(SECS_PER_HOUR)),
        );
        self.inbox.push(Event::TimerFired(Timer::Poll));
        sink.emit(&EngineEvent::Started(self.mode()));
        info!("DabService started in {}", self.mode());
    }

    // ── Event loop ────────────────────────────────────────────

    /// Queue an event from the host. Returns `false` if the inbox is full.
    pub fn post(&mut self, event: Event) -> bool {
        self.inbox.push(event)
    }

    /// Advance timers by `elapsed_secs` and process everything due.
    ///
    /// `hw` satisfies both [`DeviceDirectory`] and [`VentActuator`], which
    /// keeps the port boundary explicit without a double mutable borrow.
    pub fn tick(
        &mut self,
        elapsed_secs: f64,
        hw: &mut (impl DeviceDirectory + VentActuator),
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) -> usize {
        self.scheduler.tick(elapsed_secs, &mut self.inbox);
        self.run_pending(hw, clock, sink)
    }

    /// Drain the inbox. Returns how many events were handled.
    pub fn run_pending(
        &mut self,
        hw: &mut (impl DeviceDirectory + VentActuator),
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) -> usize {
        let mut handled = 0;
        while let Some(event) = self.inbox.pop() {
            self.dispatch(event, hw, clock, sink);
            handled += 1;
        }
        handled
    }

    fn dispatch(
        &mut self,
        event: Event,
        hw: &mut (impl DeviceDirectory + VentActuator),
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) {
        debug!("DabService: handling {:?}", event);
        match event {
            Event::TimerFired(Timer::Poll) => self.poll(hw, clock, sink),
            Event::TimerFired(Timer::Rebalance) => self.rebalance(hw, clock, sink),
            Event::TimerFired(Timer::Purge) => self.purge(clock.now_ms(), sink),
            Event::ReadingUpdated { vent } => self.observe_reading(&vent, &*hw, clock),
            Event::CycleEnded => self.end_cycle(hw, clock, sink),
        }
    }

    // ── Command handling ──────────────────────────────────────

    /// Apply an external command, then drain whatever it queued.
    pub fn handle_command(
        &mut self,
        cmd: DabCommand,
        hw: &mut (impl DeviceDirectory + VentActuator),
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        match cmd {
            DabCommand::UpdateConfig(new_config) => {
                new_config.validate()?;
                self.apply_config(new_config);
                info!("Configuration updated at runtime");
            }
            DabCommand::SetModeOverride(mode_override) => {
                self.config.mode_override = mode_override;
                self.config_dirty = true;
                self.inbox.push(Event::TimerFired(Timer::Poll));
                info!("Mode override set to {:?}", mode_override);
            }
            DabCommand::PurgeHistory => self.purge(clock.now_ms(), sink),
            DabCommand::ClearHistory => {
                self.history.clear();
                self.baselines = Baselines::new(&self.config);
                self.trace.clear();
                self.state_dirty = true;
                warn!("Learned history cleared");
            }
            DabCommand::EndCycle => {
                self.inbox.push(Event::CycleEnded);
            }
        }
        self.run_pending(hw, clock, sink);
        Ok(())
    }

    fn apply_config(&mut self, new_config: DabConfig) {
        self.history.set_params(HistoryParams::from(&new_config));
        self.trend
            .reconfigure(new_config.trend_window_minutes, new_config.trend_min_delta_c);

        if self.scheduler.is_armed(Timer::Poll) {
            self.scheduler
                .reschedule(Timer::Poll, periodic(poll_interval(&new_config, self.mode())));
        }
        if self.scheduler.is_armed(Timer::Purge) {
            self.scheduler.reschedule(
                Timer::Purge,
                periodic(new_config.purge_interval_hours.saturating_mul(SECS_PER_HOUR)),
            );
        }
        if self.scheduler.is_armed(Timer::Rebalance) {
            self.scheduler.reschedule(
                Timer::Rebalance,
                periodic(new_config.rebalance_interval_mins.saturating_mul(SECS_PER_MINUTE)),
            );
        }

        self.config = new_config;
        self.config_dirty = true;
    }

    // ── Timers ────────────────────────────────────────────────

    /// Detect the mode, step the FSM, and open or close cycles.
    fn poll(
        &mut self,
        hw: &mut (impl DeviceDirectory + VentActuator),
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) {
        let now = clock.now_ms();
        let snapshot = RoomSnapshot::capture(&*hw, now);
        self.known_rooms = snapshot.rooms.iter().map(|r| r.room.clone()).collect();
        for room in &snapshot.rooms {
            if let Some(temp) = room.current_temp {
                self.trend.push(&room.room, now, temp);
            }
        }

        let decision = detect_mode(
            &snapshot.vents,
            hw.thermostat_operating_state(),
            self.trend.system_trend(),
            &self.config,
        );
        let from = self.mode();
        self.ctx.detected = decision.mode;
        self.fsm.tick(&mut self.ctx);
        let requests = self.ctx.take_requests();
        let to = self.mode();

        if from != to {
            self.scheduler
                .reschedule(Timer::Poll, periodic(poll_interval(&self.config, to)));
            sink.emit(&EngineEvent::ModeChanged {
                from,
                to,
                reason: decision.reason,
            });
        }

        if let Some(mode) = requests.finish {
            self.finish_cycle(mode, &snapshot, hw.thermostat_setpoint(mode), sink);
        }
        if let Some(mode) = requests.start {
            self.start_cycle(mode, snapshot, hw, clock, sink);
        }
    }

    /// Mid-cycle feedback, then a fresh measurement window and new targets.
    fn rebalance(
        &mut self,
        hw: &mut (impl DeviceDirectory + VentActuator),
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) {
        let Some(mut cycle) = self.cycle.take() else {
            debug!("DabService: rebalance with no running cycle");
            return;
        };
        let mode = cycle.mode;
        let now = clock.now_ms();
        let mut snapshot = RoomSnapshot::capture(&*hw, now);
        let learned = self.record_feedback(&cycle, &snapshot, hw.thermostat_setpoint(mode), sink);

        let hour = clock.hour_of_day(now);
        self.resolve_rates(&mut snapshot, mode, hour);
        cycle.reset_window(now, &snapshot);
        self.cycle = Some(cycle);

        sink.emit(&EngineEvent::Rebalanced { mode, learned });
        self.apply_targets(mode, hour, &snapshot, hw, sink);
    }

    fn purge(&mut self, now_ms: u64, sink: &mut impl EventSink) {
        let removed = self.history.purge(now_ms);
        if removed > 0 {
            self.state_dirty = true;
        }
        sink.emit(&EngineEvent::HistoryPurged { removed });
    }

    fn observe_reading(&mut self, vent: &VentId, directory: &impl DeviceDirectory, clock: &impl Clock) {
        let Some(temp) = directory.room_temperature(vent).filter(|t| t.is_finite()) else {
            return;
        };
        let Some(room) = directory
            .rooms()
            .into_iter()
            .find(|r| r.vents.contains(vent))
            .map(|r| r.room)
        else {
            debug!("DabService: reading from unknown vent {}", vent);
            return;
        };
        self.trend.push(&room, clock.now_ms(), temp);
    }

    /// Close the running cycle now; reopen one if the system is still
    /// conditioning.
    fn end_cycle(
        &mut self,
        hw: &mut (impl DeviceDirectory + VentActuator),
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) {
        let Some(mode) = self.cycle.as_ref().map(|c| c.mode) else {
            debug!("DabService: no cycle to end");
            return;
        };
        let snapshot = RoomSnapshot::capture(&*hw, clock.now_ms());
        self.finish_cycle(mode, &snapshot, hw.thermostat_setpoint(mode), sink);
        let current = self.mode();
        if current.is_active() {
            self.start_cycle(current, snapshot, hw, clock, sink);
        }
    }

    // ── Cycle lifecycle ───────────────────────────────────────

    fn start_cycle(
        &mut self,
        mode: HvacMode,
        mut snapshot: RoomSnapshot,
        hw: &mut (impl DeviceDirectory + VentActuator),
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) {
        let now = snapshot.taken_at_ms;
        let hour = clock.hour_of_day(now);
        self.resolve_rates(&mut snapshot, mode, hour);

        let cycle = CycleRecord::start(mode, now, hour, &snapshot);
        let rooms = cycle.vents_by_room.len();
        self.cycle = Some(cycle);
        // Re-arming resets the elapsed time of any previous cycle's timer.
        self.scheduler.schedule(
            Timer::Rebalance,
            periodic(self.config.rebalance_interval_mins.saturating_mul(SECS_PER_MINUTE)),
        );
        sink.emit(&EngineEvent::CycleStarted { mode, hour, rooms });

        self.apply_targets(mode, hour, &snapshot, hw, sink);
    }

    fn finish_cycle(
        &mut self,
        mode: HvacMode,
        snapshot: &RoomSnapshot,
        thermostat_setpoint: Option<f64>,
        sink: &mut impl EventSink,
    ) {
        self.scheduler.cancel(Timer::Rebalance);
        let Some(mut cycle) = self.cycle.take() else {
            debug!("DabService: {} ended without a recorded cycle", mode);
            return;
        };
        cycle.finished_at_ms = Some(snapshot.taken_at_ms);
        let learned = self.record_feedback(&cycle, snapshot, thermostat_setpoint, sink);

        let minutes = cycle.duration_minutes().unwrap_or(0.0);
        if minutes >= self.config.min_cycle_minutes {
            self.baselines
                .observe_cycle_duration(minutes, self.config.running_time_rolling_entries);
            self.state_dirty = true;
        }
        sink.emit(&EngineEvent::CycleFinished {
            mode: cycle.mode,
            minutes,
            learned,
        });
    }

    fn record_feedback(
        &mut self,
        cycle: &CycleRecord,
        snapshot: &RoomSnapshot,
        thermostat_setpoint: Option<f64>,
        sink: &mut impl EventSink,
    ) -> usize {
        let (global_setpoint, _) =
            resolve_setpoint(&snapshot.rooms, thermostat_setpoint, cycle.mode, &self.config);
        let results = record_cycle(
            cycle,
            snapshot,
            global_setpoint,
            &mut self.history,
            &mut self.baselines,
            &self.config,
        );

        let mut learned = 0;
        for feedback in results {
            match feedback.appended {
                Some(Ok(AppendOutcome::Committed { anomaly, .. })) => {
                    learned += 1;
                    if anomaly {
                        sink.emit(&EngineEvent::AnomalyFlagged {
                            room: feedback.room,
                            mode: cycle.mode,
                            hour: cycle.hour,
                        });
                    }
                }
                Some(Ok(AppendOutcome::Duplicate)) | None => {}
                Some(Err(reason)) => sink.emit(&EngineEvent::SampleRejected {
                    room: feedback.room,
                    reason,
                }),
            }
        }
        if learned > 0 {
            self.state_dirty = true;
        }
        learned
    }

    // ── Control pipeline ──────────────────────────────────────

    /// History (non-floor) → live efficiency → global max → unknown.
    fn resolve_rate(&self, room: &RoomId, mode: HvacMode, hour: u8) -> LearnedRate {
        let lookup = self.history.lookup(room, mode, hour);
        if lookup.is_learned() {
            return LearnedRate {
                rate: lookup.rate,
                origin: RateOrigin::History(lookup.source),
            };
        }
        if let Some(rate) = self.baselines.efficiency(room, mode) {
            return LearnedRate {
                rate,
                origin: RateOrigin::LiveEfficiency,
            };
        }
        if let Some(rate) = self.baselines.max_rate(mode) {
            return LearnedRate {
                rate,
                origin: RateOrigin::GlobalMax,
            };
        }
        LearnedRate::unknown()
    }

    fn resolve_rates(&self, snapshot: &mut RoomSnapshot, mode: HvacMode, hour: u8) {
        for room in &mut snapshot.rooms {
            room.rate = self.resolve_rate(&room.room, mode, hour);
        }
    }

    /// Calculator → dampener → minimum airflow → actuator.
    fn apply_targets(
        &mut self,
        mode: HvacMode,
        hour: u8,
        snapshot: &RoomSnapshot,
        hw: &mut (impl DeviceDirectory + VentActuator),
        sink: &mut impl EventSink,
    ) {
        let plan = compute_targets(
            &snapshot.rooms,
            mode,
            hw.thermostat_setpoint(mode),
            self.baselines.max_running_minutes,
            &self.config,
        );
        self.trace.record_plan(snapshot.taken_at_ms, &plan);

        // Dampening applies to the calculator's targets only; the airflow
        // minimum is enforced on the result and is never undone.
        let floor = self.config.min_open_percent.clamp(0.0, 100.0);
        let mut targets = Vec::with_capacity(snapshot.vents.len());
        let mut held = Vec::new();
        for room in &snapshot.rooms {
            let decision = plan.decision(&room.room);
            let percent = decision.and_then(|d| d.target.percent());
            let reached = decision.is_some_and(|d| {
                d.current_temp.is_some_and(|t| {
                    reached_setpoint(mode, t, d.setpoint, self.config.setpoint_tolerance_c)
                })
            });
            let anomaly = self.history.lookup(&room.room, mode, hour).anomaly;

            for (vent, weight) in room.vents.iter().zip(&room.vent_weights) {
                let current = snapshot.vent(vent).map(|v| f64::from(v.open_percent));
                let proposed = match percent {
                    Some(p) => current.map_or(p, |c| dampen(c, p, reached, anomaly, &self.config)),
                    None => {
                        // Held rooms keep their opening but still count toward combined flow.
                        held.push(vent.clone());
                        current.unwrap_or(100.0)
                    }
                };
                targets.push(VentTarget {
                    vent: vent.clone(),
                    room: room.room.clone(),
                    percent: proposed.clamp(floor, 100.0).round(),
                    weight: *weight,
                });
            }
        }

        let temps: BTreeMap<RoomId, f64> = snapshot
            .rooms
            .iter()
            .filter_map(|r| Some((r.room.clone(), r.current_temp?)))
            .collect();
        let proposed: Vec<f64> = targets.iter().map(|t| t.percent).collect();
        let report = enforce_minimum_airflow(&mut targets, &temps, mode, &self.config);
        if report.iterations > 0 {
            sink.emit(&EngineEvent::AirflowRaised {
                before: report.combined_before,
                after: report.combined_after,
                satisfied: report.satisfied,
            });
        }

        for (target, before) in targets.iter().zip(&proposed) {
            let raised = target.percent > *before;
            if !raised && held.contains(&target.vent) {
                debug!("DabService: {} held at {:.0}%", target.vent, before);
                continue;
            }
            // Raised vents round up so the commanded total keeps the minimum.
            let percent = if raised { target.percent.ceil() } else { target.percent };
            let percent = percent.clamp(floor, 100.0) as u8;

            hw.set_open_percent(&target.vent, percent);
            sink.emit(&EngineEvent::VentCommanded {
                vent: target.vent.clone(),
                room: target.room.clone(),
                percent,
            });
        }
        info!(
            "DabService: {} vents evaluated for {} (longest {:.1} min, setpoint {:.1})",
            targets.len(),
            mode,
            plan.longest_minutes,
            plan.global_setpoint
        );
    }

    // ── Persistence ───────────────────────────────────────────

    /// Write history and baselines through `storage`.
    pub fn persist(&mut self, storage: &mut impl StoragePort) -> Result<()> {
        self.history.save(storage)?;
        let bytes = persist::encode(&self.baselines)?;
        storage.write(HISTORY_NAMESPACE, BASELINES_KEY, &bytes)?;
        self.state_dirty = false;
        Ok(())
    }

    /// Persist if anything was learned since the last save. A failure is
    /// reported through `sink` and retried on the next call.
    pub fn persist_if_dirty(&mut self, storage: &mut impl StoragePort, sink: &mut impl EventSink) -> bool {
        if !self.state_dirty {
            return false;
        }
        match self.persist(storage) {
            Ok(()) => {
                info!("Learned state saved");
                true
            }
            Err(e) => {
                warn!("Learned state save failed: {}", e);
                sink.emit(&EngineEvent::PersistFailed);
                false
            }
        }
    }

    pub fn save_config_if_dirty(&mut self, port: &impl ConfigPort) -> bool {
        if !self.config_dirty {
            return false;
        }
        match port.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("Config saved");
                true
            }
            Err(e) => {
                warn!("Config save failed: {}", e);
                false
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn mode(&self) -> HvacMode {
        self.fsm.current_state().mode()
    }

    pub fn config(&self) -> &DabConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn baselines(&self) -> &Baselines {
        &self.baselines
    }

    pub fn cycle(&self) -> Option<&CycleRecord> {
        self.cycle.as_ref()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn trace(&self) -> &DecisionTrace {
        &self.trace
    }

    pub fn pending_events(&self) -> usize {
        self.inbox.len()
    }

    pub fn is_state_dirty(&self) -> bool {
        self.state_dirty
    }

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }

    pub fn diagnostics(&self, now_ms: u64) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot::collect(
            now_ms,
            self.mode(),
            &self.known_rooms,
            &self.trace,
            &self.history,
            &self.baselines,
        )
        .with_queue_health(self.scheduler.active_count(), self.inbox.dropped())
    }
}

fn poll_interval(config: &DabConfig, mode: HvacMode) -> u32 {
    if mode.is_active() {
        config.poll_active_secs
    } else {
        config.poll_idle_secs
    }
}

fn load_baselines(storage: &impl StoragePort) -> Result<Option<Baselines>> {
    match storage.read(HISTORY_NAMESPACE, BASELINES_KEY) {
        Ok(bytes) => persist::decode(&bytes).map(Some),
        Err(StorageError::NotFound) => Ok(None),
        Err(e) => Err(Error::Storage(e)),
    }
}
