//! HVAC mode detection from duct/room temperature deltas.
//!
//! Pure: the result depends only on the readings, thermostat state, trend
//! and config passed in.
//!
//! ```text
//!  override ≠ Auto ──────────────────────────────▶ forced mode
//!  any vent: duct − room < −threshold ───────────▶ Cooling
//!  any vent: duct − room > +threshold ───────────▶ Heating
//!  thermostat reports a state ───────────────────▶ that state
//!  sustained falling / rising room trend ────────▶ Cooling / Heating
//!  otherwise ────────────────────────────────────▶ Idle
//! ```

use serde::Serialize;

use crate::config::DabConfig;
use crate::model::{HvacMode, VentId};
use crate::sensors::snapshot::VentReading;
use crate::sensors::trend::Trend;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ModeReason {
    Override,
    DuctDelta { vent: VentId, delta: f64 },
    Thermostat,
    Trend(Trend),
    NoSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeDecision {
    pub mode: HvacMode,
    pub reason: ModeReason,
}

pub fn detect_mode(
    vents: &[VentReading],
    thermostat: Option<HvacMode>,
    trend: Trend,
    config: &DabConfig,
) -> ModeDecision {
    if let Some(mode) = config.mode_override.forced() {
        return ModeDecision {
            mode,
            reason: ModeReason::Override,
        };
    }

    let threshold = config.duct_temp_diff_threshold_c;
    let deltas = || vents.iter().filter_map(|v| Some((&v.vent, v.delta()?)));

    if let Some((vent, delta)) = deltas().find(|(_, d)| *d < -threshold) {
        return ModeDecision {
            mode: HvacMode::Cooling,
            reason: ModeReason::DuctDelta {
                vent: vent.clone(),
                delta,
            },
        };
    }
    if let Some((vent, delta)) = deltas().find(|(_, d)| *d > threshold) {
        return ModeDecision {
            mode: HvacMode::Heating,
            reason: ModeReason::DuctDelta {
                vent: vent.clone(),
                delta,
            },
        };
    }

    if let Some(mode) = thermostat {
        return ModeDecision {
            mode,
            reason: ModeReason::Thermostat,
        };
    }

    let mode = match trend {
        Trend::Falling => HvacMode::Cooling,
        Trend::Rising => HvacMode::Heating,
        Trend::Flat => {
            return ModeDecision {
                mode: HvacMode::Idle,
                reason: ModeReason::NoSignal,
            };
        }
    };
    ModeDecision {
        mode,
        reason: ModeReason::Trend(trend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModeOverride;
    use crate::model::RoomId;

    fn vent(id: &str, room: Option<f64>, duct: Option<f64>) -> VentReading {
        VentReading {
            vent: VentId::new(id),
            room: RoomId::new("r"),
            room_temp: room,
            duct_temp: duct,
            open_percent: 50,
            weight: 1.0,
        }
    }

    fn cfg() -> DabConfig {
        DabConfig::default()
    }

    #[test]
    fn cold_duct_means_cooling() {
        let vents = [vent("a", Some(24.0), Some(24.1)), vent("b", Some(24.0), Some(15.0))];
        let d = detect_mode(&vents, None, Trend::Flat, &cfg());
        assert_eq!(d.mode, HvacMode::Cooling);
        assert!(matches!(d.reason, ModeReason::DuctDelta { ref vent, .. } if vent.as_str() == "b"));
    }

    #[test]
    fn warm_duct_means_heating() {
        let vents = [vent("a", Some(19.0), Some(35.0))];
        assert_eq!(detect_mode(&vents, None, Trend::Flat, &cfg()).mode, HvacMode::Heating);
    }

    #[test]
    fn cooling_checked_before_heating() {
        let vents = [vent("a", Some(20.0), Some(30.0)), vent("b", Some(20.0), Some(10.0))];
        assert_eq!(detect_mode(&vents, None, Trend::Flat, &cfg()).mode, HvacMode::Cooling);
    }

    #[test]
    fn delta_within_threshold_is_ignored() {
        let vents = [vent("a", Some(20.0), Some(20.4)), vent("b", Some(20.0), Some(19.6))];
        let d = detect_mode(&vents, None, Trend::Flat, &cfg());
        assert_eq!(d.mode, HvacMode::Idle);
        assert_eq!(d.reason, ModeReason::NoSignal);
    }

    #[test]
    fn missing_readings_are_skipped() {
        let vents = [vent("a", None, Some(10.0)), vent("b", Some(20.0), None)];
        assert_eq!(detect_mode(&vents, None, Trend::Flat, &cfg()).mode, HvacMode::Idle);
    }

    #[test]
    fn thermostat_then_trend_fallbacks() {
        let d = detect_mode(&[], Some(HvacMode::Heating), Trend::Falling, &cfg());
        assert_eq!(d.mode, HvacMode::Heating);
        assert_eq!(d.reason, ModeReason::Thermostat);

        let d = detect_mode(&[], None, Trend::Falling, &cfg());
        assert_eq!(d.mode, HvacMode::Cooling);
        assert_eq!(d.reason, ModeReason::Trend(Trend::Falling));
    }

    #[test]
    fn override_short_circuits() {
        let c = DabConfig {
            mode_override: ModeOverride::Idle,
            ..cfg()
        };
        let vents = [vent("a", Some(24.0), Some(10.0))];
        let d = detect_mode(&vents, None, Trend::Flat, &c);
        assert_eq!(d.mode, HvacMode::Idle);
        assert_eq!(d.reason, ModeReason::Override);
    }
}
