//! Learned state across restarts, and the diagnostics export.

use crate::mock_directory::{Rig, T0_HOUR};

use ventbalance::adapters::memory::MemoryStore;
use ventbalance::app::events::EngineEvent;
use ventbalance::app::ports::{Clock, StoragePort};
use ventbalance::app::service::{BASELINES_KEY, DabService};
use ventbalance::config::DabConfig;
use ventbalance::history::persist::{HISTORY_KEY, HISTORY_NAMESPACE};
use ventbalance::model::{HvacMode, RoomId};

fn learned_rig() -> Rig {
    let mut rig = Rig::cooling(DabConfig::default());
    rig.finish_cooling_cycle();
    rig
}

#[test]
fn learned_state_survives_restart() {
    let mut rig = learned_rig();
    let mut store = MemoryStore::new();

    assert!(rig.svc.persist_if_dirty(&mut store, &mut rig.sink));
    assert!(!rig.svc.is_state_dirty());
    assert!(store.exists(HISTORY_NAMESPACE, HISTORY_KEY));
    assert!(store.exists(HISTORY_NAMESPACE, BASELINES_KEY));

    let restored = DabService::restore(DabConfig::default(), &store);
    assert_eq!(restored.history().len(), rig.svc.history().len());
    assert_eq!(restored.baselines(), rig.svc.baselines());

    let room = RoomId::new("living");
    assert_eq!(
        restored.history().lookup(&room, HvacMode::Cooling, T0_HOUR),
        rig.svc.history().lookup(&room, HvacMode::Cooling, T0_HOUR)
    );
}

#[test]
fn clean_state_is_not_rewritten() {
    let mut rig = learned_rig();
    let mut store = MemoryStore::new();
    assert!(rig.svc.persist_if_dirty(&mut store, &mut rig.sink));
    assert!(!rig.svc.persist_if_dirty(&mut store, &mut rig.sink));
}

#[test]
fn corrupted_history_restores_empty() {
    let mut rig = learned_rig();
    let mut store = MemoryStore::new();
    rig.svc.persist(&mut store).expect("persist");
    store.inject(HISTORY_NAMESPACE, HISTORY_KEY, b"not a snapshot");

    let restored = DabService::restore(DabConfig::default(), &store);
    assert!(restored.history().is_empty());
    // Baselines live in their own blob and still load.
    assert_eq!(restored.baselines(), rig.svc.baselines());
}

#[test]
fn empty_storage_restores_fresh_state() {
    let store = MemoryStore::new();
    let restored = DabService::restore(DabConfig::default(), &store);
    assert!(restored.history().is_empty());
    assert_eq!(restored.baselines().max_cooling_rate, 0.0);
}

#[test]
fn failed_save_is_reported_and_retried() {
    let mut rig = learned_rig();
    let mut store = MemoryStore::with_capacity_limit(4);

    assert!(!rig.svc.persist_if_dirty(&mut store, &mut rig.sink));
    assert!(rig.sink.events.contains(&EngineEvent::PersistFailed));
    assert!(rig.svc.is_state_dirty());
}

#[test]
fn diagnostics_export_covers_every_room_and_hour() {
    let rig = learned_rig();
    let diag = rig.svc.diagnostics(rig.clock.now_ms());

    assert_eq!(diag.mode, HvacMode::Idle);
    assert_eq!(diag.stored_samples, 2);
    // Two rooms, two active modes, 24 hours.
    assert_eq!(diag.rates.len(), 2 * 2 * 24);
    assert!(!diag.decisions.is_empty());

    let learned = diag
        .rates
        .iter()
        .find(|r| r.room.as_str() == "living" && r.mode == HvacMode::Cooling && r.hour == T0_HOUR)
        .expect("bucket row");
    assert_eq!(learned.sample_count, 1);

    let json = diag.to_json().expect("json");
    assert!(json.contains("\"living\""));
    assert!(json.contains("max_running_minutes"));

    let csv = diag.to_csv().expect("csv");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("room,mode,hour,rate,source,sample_count,anomaly_flag,carry_forward_used")
    );
    assert_eq!(lines.count(), diag.rates.len());
}
