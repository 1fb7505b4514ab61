//! Minimum combined airflow enforcer.
//!
//! Combined flow is the weighted mean opening across every motorized vent
//! plus the configured number of conventional vents (assumed open at a
//! fixed percentage). While it is below the minimum, every vent below 100%
//! is nudged up, weighted by how far its room is from the most-satisfied
//! room. Terminates on success, when every vent is full, or at the
//! iteration cap.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::Serialize;

use crate::config::DabConfig;
use crate::model::{HvacMode, RoomId, VentId};

/// Lower bound on the per-iteration proportion so every vent keeps moving.
const MIN_PROPORTION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VentTarget {
    pub vent: VentId,
    pub room: RoomId,
    pub percent: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AirflowReport {
    pub combined_before: f64,
    pub combined_after: f64,
    pub iterations: u32,
    pub satisfied: bool,
}

/// Weighted combined opening (0–100) including conventional vents.
pub fn combined_flow_percent(targets: &[VentTarget], config: &DabConfig) -> f64 {
    let conventional = f64::from(config.conventional_vent_count);
    let (sum, weight) = targets.iter().fold((0.0, 0.0), |(s, w), t| {
        (s + t.percent * t.weight, w + t.weight)
    });
    let total_weight = weight + conventional;
    if total_weight <= 0.0 {
        return 100.0;
    }
    (sum + conventional * config.conventional_vent_open_percent) / total_weight
}

/// Raise openings until the combined minimum is met.
///
/// `room_temps` holds current temperatures; rooms without a reading get
/// the full increment.
pub fn enforce_minimum_airflow(
    targets: &mut [VentTarget],
    room_temps: &BTreeMap<RoomId, f64>,
    mode: HvacMode,
    config: &DabConfig,
) -> AirflowReport {
    let minimum = config.min_combined_flow_percent;
    let combined_before = combined_flow_percent(targets, config);
    let mut report = AirflowReport {
        combined_before,
        combined_after: combined_before,
        iterations: 0,
        satisfied: combined_before >= minimum,
    };
    if report.satisfied || targets.is_empty() {
        return report;
    }

    let temps: Vec<f64> = targets
        .iter()
        .filter_map(|t| room_temps.get(&t.room).copied())
        .collect();
    let lo = temps.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = temps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let proportions: Vec<f64> = targets
        .iter()
        .map(|t| proportion(room_temps.get(&t.room).copied(), lo, hi, mode))
        .collect();

    while report.combined_after < minimum && report.iterations < config.airflow_max_iterations {
        let mut moved = false;
        for (t, p) in targets.iter_mut().zip(&proportions) {
            if t.percent >= 100.0 {
                continue;
            }
            let step = config.airflow_increment_percent * p.max(MIN_PROPORTION);
            t.percent = (t.percent + step).min(100.0);
            moved = true;
        }
        report.iterations += 1;
        report.combined_after = combined_flow_percent(targets, config);
        if !moved {
            break;
        }
    }

    report.satisfied = report.combined_after >= minimum;
    if report.satisfied {
        debug!(
            "airflow: combined {:.1}% -> {:.1}% in {} iterations",
            report.combined_before, report.combined_after, report.iterations
        );
    } else {
        warn!(
            "airflow: combined flow {:.1}% still below {:.1}% after {} iterations",
            report.combined_after, minimum, report.iterations
        );
    }
    report
}

/// Share of the increment a room receives.
///
/// Cooling favours the hottest room, heating the coldest.
fn proportion(temp: Option<f64>, lo: f64, hi: f64, mode: HvacMode) -> f64 {
    let Some(t) = temp else { return 1.0 };
    let span = hi - lo;
    if !(span > 0.0) {
        return 1.0;
    }
    match mode {
        HvacMode::Cooling => (t - lo) / span,
        HvacMode::Heating => (hi - t) / span,
        HvacMode::Idle => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(vent: &str, room: &str, percent: f64) -> VentTarget {
        VentTarget {
            vent: VentId::new(vent),
            room: RoomId::new(room),
            percent,
            weight: 1.0,
        }
    }

    fn temps(pairs: &[(&str, f64)]) -> BTreeMap<RoomId, f64> {
        pairs.iter().map(|(r, t)| (RoomId::new(*r), *t)).collect()
    }

    #[test]
    fn lifts_low_combined_flow_to_minimum() {
        let c = DabConfig::default();
        let mut t = vec![target("a", "ra", 10.0), target("b", "rb", 10.0)];
        let report =
            enforce_minimum_airflow(&mut t, &temps(&[("ra", 26.0), ("rb", 23.0)]), HvacMode::Cooling, &c);
        assert!(report.satisfied);
        assert!(combined_flow_percent(&t, &c) >= 30.0);
        assert!(t.iter().all(|v| v.percent <= 100.0));
        assert!(t[0].percent > t[1].percent, "hotter room gains more while cooling");
    }

    #[test]
    fn heating_favours_coldest_room() {
        let c = DabConfig::default();
        let mut t = vec![target("a", "ra", 0.0), target("b", "rb", 0.0)];
        enforce_minimum_airflow(&mut t, &temps(&[("ra", 18.0), ("rb", 21.0)]), HvacMode::Heating, &c);
        assert!(t[0].percent > t[1].percent);
    }

    #[test]
    fn already_satisfied_is_untouched() {
        let c = DabConfig::default();
        let mut t = vec![target("a", "ra", 40.0)];
        let report = enforce_minimum_airflow(&mut t, &BTreeMap::new(), HvacMode::Cooling, &c);
        assert_eq!(report.iterations, 0);
        assert_eq!(t[0].percent, 40.0);
    }

    #[test]
    fn conventional_vents_count_toward_minimum() {
        let c = DabConfig {
            conventional_vent_count: 2,
            ..DabConfig::default()
        };
        let t = vec![target("a", "ra", 0.0)];
        let combined = combined_flow_percent(&t, &c);
        assert!((combined - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn unreachable_minimum_terminates() {
        let c = DabConfig {
            min_combined_flow_percent: 90.0,
            conventional_vent_count: 10,
            conventional_vent_open_percent: 0.0,
            ..DabConfig::default()
        };
        let mut t = vec![target("a", "ra", 0.0)];
        let report = enforce_minimum_airflow(&mut t, &BTreeMap::new(), HvacMode::Cooling, &c);
        assert!(!report.satisfied);
        assert_eq!(t[0].percent, 100.0);
        assert!(report.iterations <= c.airflow_max_iterations);
    }
}
