//! Mock house adapter for integration tests.
//!
//! Implements `DeviceDirectory` and `VentActuator` over plain maps and
//! records every actuator call so tests can assert on what the engine
//! commanded.

use std::collections::BTreeMap;

use ventbalance::app::events::EngineEvent;
use ventbalance::app::ports::{DeviceDirectory, EventSink, RoomDescriptor, VentActuator};
use ventbalance::model::{HvacMode, RoomId, VentId};

/// Opening reported for a vent that was never commanded.
pub const INITIAL_OPEN: u8 = 50;

#[derive(Debug, Clone)]
pub struct MockRoom {
    pub vents: Vec<VentId>,
    pub temp: Option<f64>,
    pub duct: Option<f64>,
    pub setpoint: Option<f64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HouseCall {
    SetOpen(VentId, u8),
}

pub struct MockHouse {
    pub rooms: BTreeMap<RoomId, MockRoom>,
    pub open: BTreeMap<VentId, u8>,
    pub thermostat: Option<HvacMode>,
    pub calls: Vec<HouseCall>,
}

#[allow(dead_code)]
impl MockHouse {
    pub fn new() -> Self {
        Self {
            rooms: BTreeMap::new(),
            open: BTreeMap::new(),
            thermostat: None,
            calls: Vec::new(),
        }
    }

    /// Add a room with one vent named `<room>-1`.
    pub fn with_room(mut self, room: &str, temp: f64, setpoint: f64) -> Self {
        self.rooms.insert(
            RoomId::new(room),
            MockRoom {
                vents: vec![VentId::new(format!("{room}-1"))],
                temp: Some(temp),
                duct: Some(temp),
                setpoint: Some(setpoint),
                active: true,
            },
        );
        self
    }

    pub fn room_mut(&mut self, room: &str) -> &mut MockRoom {
        self.rooms
            .get_mut(&RoomId::new(room))
            .expect("room registered")
    }

    pub fn set_temp(&mut self, room: &str, temp: f64) {
        self.room_mut(room).temp = Some(temp);
    }

    /// Same supply temperature at every vent.
    pub fn set_duct_all(&mut self, duct: f64) {
        for r in self.rooms.values_mut() {
            r.duct = Some(duct);
        }
    }

    /// Duct equal to room temperature everywhere: the air handler is off.
    pub fn settle_ducts(&mut self) {
        for r in self.rooms.values_mut() {
            r.duct = r.temp;
        }
    }

    pub fn set_active(&mut self, room: &str, active: bool) {
        self.room_mut(room).active = active;
    }

    pub fn opening(&self, vent: &str) -> u8 {
        self.open
            .get(&VentId::new(vent))
            .copied()
            .unwrap_or(INITIAL_OPEN)
    }

    /// Most recent command for `vent`, if any.
    pub fn last_command(&self, vent: &str) -> Option<u8> {
        let id = VentId::new(vent);
        self.calls.iter().rev().find_map(|c| match c {
            HouseCall::SetOpen(v, p) if *v == id => Some(*p),
            _ => None,
        })
    }

    pub fn command_count(&self) -> usize {
        self.calls.len()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn room_of(&self, vent: &VentId) -> Option<&MockRoom> {
        self.rooms.values().find(|r| r.vents.contains(vent))
    }
}

impl DeviceDirectory for MockHouse {
    fn rooms(&self) -> Vec<RoomDescriptor> {
        self.rooms
            .iter()
            .map(|(id, r)| RoomDescriptor {
                room: id.clone(),
                vents: r.vents.clone(),
                vent_weights: None,
            })
            .collect()
    }

    fn room_temperature(&self, vent: &VentId) -> Option<f64> {
        self.room_of(vent)?.temp
    }

    fn duct_temperature(&self, vent: &VentId) -> Option<f64> {
        self.room_of(vent)?.duct
    }

    fn setpoint(&self, room: &RoomId) -> Option<f64> {
        self.rooms.get(room)?.setpoint
    }

    fn is_room_active(&self, room: &RoomId) -> bool {
        self.rooms.get(room).is_some_and(|r| r.active)
    }

    fn current_open_percent(&self, vent: &VentId) -> u8 {
        self.open.get(vent).copied().unwrap_or(INITIAL_OPEN)
    }

    fn thermostat_operating_state(&self) -> Option<HvacMode> {
        self.thermostat
    }
}

impl VentActuator for MockHouse {
    fn set_open_percent(&mut self, vent: &VentId, percent: u8) {
        self.open.insert(vent.clone(), percent);
        self.calls.push(HouseCall::SetOpen(vent.clone(), percent));
    }
}

// ── Event recorder ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<EngineEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn last_finished(&self) -> Option<&EngineEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| matches!(e, EngineEvent::CycleFinished { .. }))
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &EngineEvent) {
        self.events.push(event.clone());
    }
}

// ── Harness ───────────────────────────────────────────────────

/// Top of an hour (22:00 UTC).
pub const T0: u64 = 1_699_999_200_000;
pub const T0_HOUR: u8 = 22;

pub struct Rig {
    pub svc: ventbalance::app::service::DabService,
    pub house: MockHouse,
    pub clock: ventbalance::adapters::clock::ManualClock,
    pub sink: RecordingSink,
}

#[allow(dead_code)]
impl Rig {
    /// Two warm rooms, cold supply air, service started and first poll run.
    pub fn cooling(config: ventbalance::config::DabConfig) -> Self {
        let mut house = MockHouse::new()
            .with_room("living", 26.0, 22.0)
            .with_room("bedroom", 26.0, 22.0);
        house.set_duct_all(14.0);
        Self::started(config, house)
    }

    pub fn started(config: ventbalance::config::DabConfig, house: MockHouse) -> Self {
        let mut rig = Self {
            svc: ventbalance::app::service::DabService::new(config),
            house,
            clock: ventbalance::adapters::clock::ManualClock::new(T0),
            sink: RecordingSink::default(),
        };
        rig.svc.start(&mut rig.sink);
        rig.svc.run_pending(&mut rig.house, &rig.clock, &mut rig.sink);
        rig
    }

    /// Advance the clock and the timers together.
    pub fn advance(&mut self, secs: u64) -> usize {
        self.clock.advance_secs(secs);
        self.svc
            .tick(secs as f64, &mut self.house, &self.clock, &mut self.sink)
    }

    pub fn command(
        &mut self,
        cmd: ventbalance::app::commands::DabCommand,
    ) -> ventbalance::error::Result<()> {
        self.svc
            .handle_command(cmd, &mut self.house, &self.clock, &mut self.sink)
    }

    /// Twenty minutes of cooling (living 26→24, bedroom 26→25), then the
    /// thermostat reports idle and the ducts settle.
    pub fn finish_cooling_cycle(&mut self) {
        self.house.set_temp("living", 24.0);
        self.house.set_temp("bedroom", 25.0);
        self.house.settle_ducts();
        self.house.thermostat = Some(HvacMode::Idle);
        self.advance(20 * 60);
    }
}
