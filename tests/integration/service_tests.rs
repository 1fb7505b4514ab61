//! Integration tests for the DabService → FSM → control → actuator pipeline.
//!
//! These drive the service through its timers and commands the way a host
//! would and verify what reaches the vents and the event sink.

use crate::mock_directory::{MockHouse, Rig, T0_HOUR};

use ventbalance::adapters::memory::MemoryStore;
use ventbalance::app::commands::DabCommand;
use ventbalance::app::events::EngineEvent;
use ventbalance::app::ports::{Clock, ConfigPort};
use ventbalance::config::{DabConfig, ModeOverride};
use ventbalance::events::Event;
use ventbalance::model::{HvacMode, RoomId, VentId};
use ventbalance::scheduler::{Timer, TimerKind};
use ventbalance::sensors::snapshot::RateOrigin;

fn living() -> RoomId {
    RoomId::new("living")
}

fn bedroom() -> RoomId {
    RoomId::new("bedroom")
}

// ── Mode detection and cycle start ────────────────────────────

#[test]
fn cold_supply_starts_cooling_and_opens_unlearned_rooms() {
    let rig = Rig::cooling(DabConfig::default());

    assert_eq!(rig.svc.mode(), HvacMode::Cooling);
    assert!(rig.svc.cycle().is_some());
    assert!(rig.sink.events.contains(&EngineEvent::CycleStarted {
        mode: HvacMode::Cooling,
        hour: T0_HOUR,
        rooms: 2,
    }));
    assert_eq!(
        rig.sink.count(|e| matches!(
            e,
            EngineEvent::ModeChanged { from: HvacMode::Idle, to: HvacMode::Cooling, .. }
        )),
        1
    );
    // No learned rate anywhere: every room opens fully.
    assert_eq!(rig.house.last_command("living-1"), Some(100));
    assert_eq!(rig.house.last_command("bedroom-1"), Some(100));
}

#[test]
fn idle_house_commands_nothing() {
    let house = MockHouse::new()
        .with_room("living", 22.0, 22.0)
        .with_room("bedroom", 22.0, 22.0);
    let rig = Rig::started(DabConfig::default(), house);

    assert_eq!(rig.svc.mode(), HvacMode::Idle);
    assert!(rig.svc.cycle().is_none());
    assert_eq!(rig.house.command_count(), 0);
    assert!(!rig.svc.scheduler().is_armed(Timer::Rebalance));
}

#[test]
fn warm_supply_starts_heating() {
    let mut house = MockHouse::new().with_room("office", 18.0, 21.0);
    house.set_duct_all(38.0);
    let rig = Rig::started(DabConfig::default(), house);

    assert_eq!(rig.svc.mode(), HvacMode::Heating);
    assert_eq!(rig.house.last_command("office-1"), Some(100));
}

// ── Learning ──────────────────────────────────────────────────

#[test]
fn finished_cycle_learns_each_room() {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.finish_cooling_cycle();

    assert_eq!(rig.svc.mode(), HvacMode::Idle);
    assert!(rig.svc.cycle().is_none());
    assert!(!rig.svc.scheduler().is_armed(Timer::Rebalance));
    assert_eq!(
        rig.sink.last_finished(),
        Some(&EngineEvent::CycleFinished {
            mode: HvacMode::Cooling,
            minutes: 20.0,
            learned: 2,
        })
    );

    let history = rig.svc.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history.samples(&living(), HvacMode::Cooling, T0_HOUR).len(), 1);
    assert_eq!(history.samples(&bedroom(), HvacMode::Cooling, T0_HOUR).len(), 1);
    assert!(history.lookup(&living(), HvacMode::Cooling, T0_HOUR).is_learned());

    let baselines = rig.svc.baselines();
    assert!(baselines.max_cooling_rate > 0.0);
    assert!(baselines.efficiency(&living(), HvacMode::Cooling).is_some());
    // A 20-minute cycle pulls the running-time estimate below its 60-minute seed.
    assert!(baselines.max_running_minutes < 60.0);
    assert!(rig.svc.is_state_dirty());
}

#[test]
fn next_cycle_uses_learned_rates() {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.finish_cooling_cycle();

    rig.house.thermostat = None;
    rig.house.set_temp("living", 26.0);
    rig.house.set_temp("bedroom", 26.0);
    rig.house.set_duct_all(14.0);
    rig.advance(10 * 60);

    assert_eq!(rig.svc.mode(), HvacMode::Cooling);
    let records = rig.svc.trace().records();
    let latest: Vec<_> = records.iter().rev().take(2).collect();
    assert_eq!(latest.len(), 2);
    for record in latest {
        assert!(
            matches!(record.rate_origin, RateOrigin::History(_)),
            "{} used {:?}",
            record.room,
            record.rate_origin
        );
    }
    // Same temperatures and the same learned rate: same opening.
    assert_eq!(
        rig.house.last_command("living-1"),
        rig.house.last_command("bedroom-1")
    );
}

#[test]
fn short_cycle_does_not_move_running_time() {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.house.settle_ducts();
    rig.house.thermostat = Some(HvacMode::Idle);
    rig.advance(2 * 60);

    assert_eq!(rig.svc.mode(), HvacMode::Idle);
    assert_eq!(rig.svc.baselines().max_running_minutes, 60.0);
    assert!(rig.svc.history().is_empty());
}

// ── Airflow safety ────────────────────────────────────────────

#[test]
fn inactive_rooms_still_get_minimum_airflow() {
    let mut house = MockHouse::new()
        .with_room("living", 26.0, 22.0)
        .with_room("bedroom", 26.0, 22.0);
    house.set_duct_all(14.0);
    house.set_active("living", false);
    house.set_active("bedroom", false);
    let rig = Rig::started(DabConfig::default(), house);

    assert!(
        rig.sink
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::AirflowRaised { satisfied: true, .. }))
    );
    let living = rig.house.last_command("living-1").expect("commanded");
    let bedroom = rig.house.last_command("bedroom-1").expect("commanded");
    assert!(living >= 30 && bedroom >= 30, "living {living} bedroom {bedroom}");
}

#[test]
fn commanded_openings_keep_minimum_airflow_for_closed_vents() {
    // Both rooms are already past setpoint and their vents are shut.
    let mut house = MockHouse::new()
        .with_room("a", 21.0, 22.0)
        .with_room("b", 21.0, 22.0);
    house.set_duct_all(12.0);
    house.open.insert(VentId::new("a-1"), 0);
    house.open.insert(VentId::new("b-1"), 0);
    let cfg = DabConfig::default();
    let minimum = cfg.min_combined_flow_percent;
    let rig = Rig::started(cfg, house);

    assert_eq!(rig.svc.mode(), HvacMode::Cooling);
    assert!(
        rig.sink
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::AirflowRaised { satisfied: true, .. }))
    );
    let a = rig.house.last_command("a-1").expect("a commanded");
    let b = rig.house.last_command("b-1").expect("b commanded");
    let combined = (f64::from(a) + f64::from(b)) / 2.0;
    assert!(combined >= minimum, "a {a}% b {b}% combined {combined}%");
}

// ── Timers ────────────────────────────────────────────────────

#[test]
fn rebalance_timer_records_mid_cycle_feedback() {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.house.set_temp("living", 24.0);
    rig.house.set_temp("bedroom", 25.0);
    rig.advance(30 * 60);

    assert!(rig.sink.events.contains(&EngineEvent::Rebalanced {
        mode: HvacMode::Cooling,
        learned: 2,
    }));
    let cycle = rig.svc.cycle().expect("cycle still running");
    assert_eq!(cycle.cycle_started_at_ms, rig.clock.now_ms());
    assert_eq!(cycle.start_temps.get(&living()), Some(&24.0));
    // The cycle's hour stays pinned to its start.
    assert_eq!(cycle.hour, T0_HOUR);
}

#[test]
fn active_mode_polls_faster() {
    let rig = Rig::cooling(DabConfig::default());
    assert_eq!(
        rig.svc.scheduler().kind_of(Timer::Poll),
        Some(TimerKind::Periodic {
            interval_secs: DabConfig::default().poll_active_secs
        })
    );
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn end_cycle_records_and_reopens() {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.house.set_temp("living", 25.0);
    rig.house.set_temp("bedroom", 25.5);
    rig.clock.advance_secs(10 * 60);

    rig.command(DabCommand::EndCycle).expect("end cycle");

    assert!(matches!(
        rig.sink.last_finished(),
        Some(EngineEvent::CycleFinished { learned: 2, .. })
    ));
    assert_eq!(
        rig.sink.count(|e| matches!(e, EngineEvent::CycleStarted { .. })),
        2
    );
    let cycle = rig.svc.cycle().expect("new cycle");
    assert_eq!(cycle.started_at_ms, rig.clock.now_ms());
}

#[test]
fn end_cycle_without_cycle_is_a_no_op() {
    let house = MockHouse::new().with_room("living", 22.0, 22.0);
    let mut rig = Rig::started(DabConfig::default(), house);
    rig.command(DabCommand::EndCycle).expect("accepted");
    assert!(rig.sink.last_finished().is_none());
}

#[test]
fn idle_override_closes_running_cycle() {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.house.set_temp("living", 25.0);
    rig.house.set_temp("bedroom", 25.0);
    rig.clock.advance_secs(10 * 60);

    rig.command(DabCommand::SetModeOverride(ModeOverride::Idle))
        .expect("override");

    assert_eq!(rig.svc.mode(), HvacMode::Idle);
    assert!(rig.svc.cycle().is_none());
    assert!(rig.sink.last_finished().is_some());
    assert!(rig.svc.is_config_dirty());
}

#[test]
fn purge_drops_expired_samples() {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.finish_cooling_cycle();
    assert_eq!(rig.svc.history().len(), 2);

    rig.clock.advance_secs(11 * 24 * 3600);
    rig.command(DabCommand::PurgeHistory).expect("purge");

    assert!(rig.svc.history().is_empty());
    assert!(rig.sink.events.contains(&EngineEvent::HistoryPurged { removed: 2 }));
}

#[test]
fn clear_history_resets_learned_state() {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.finish_cooling_cycle();

    rig.command(DabCommand::ClearHistory).expect("clear");

    assert!(rig.svc.history().is_empty());
    assert_eq!(rig.svc.baselines().max_cooling_rate, 0.0);
    assert!(rig.svc.trace().is_empty());
    assert!(
        !rig.svc
            .history()
            .lookup(&living(), HvacMode::Cooling, T0_HOUR)
            .is_learned()
    );
}

#[test]
fn config_update_reschedules_and_saves() {
    let house = MockHouse::new().with_room("living", 22.0, 22.0);
    let mut rig = Rig::started(DabConfig::default(), house);
    let cfg = DabConfig {
        poll_idle_secs: 120,
        ..DabConfig::default()
    };

    rig.command(DabCommand::UpdateConfig(cfg.clone()))
        .expect("valid config");

    assert_eq!(
        rig.svc.scheduler().kind_of(Timer::Poll),
        Some(TimerKind::Periodic { interval_secs: 120 })
    );
    let store = MemoryStore::new();
    assert!(rig.svc.save_config_if_dirty(&store));
    assert!(!rig.svc.is_config_dirty());
    assert_eq!(store.load(), Ok(cfg));
}

#[test]
fn inbox_overflow_is_reported() {
    let mut svc = ventbalance::app::service::DabService::new(DabConfig::default());
    let accepted = (0..40)
        .filter(|i| {
            svc.post(Event::ReadingUpdated {
                vent: VentId::new(format!("v{i}")),
            })
        })
        .count();
    assert_eq!(accepted, 32);
    assert_eq!(svc.pending_events(), 32);
    assert_eq!(svc.diagnostics(0).inbox_dropped, 8);
}

#[test]
fn diagnostics_report_armed_timers() {
    let rig = Rig::cooling(DabConfig::default());
    let diag = rig.svc.diagnostics(rig.clock.now_ms());
    // Poll, purge and the in-cycle rebalance.
    assert_eq!(diag.armed_timers, 3);
    assert_eq!(diag.inbox_dropped, 0);
}
