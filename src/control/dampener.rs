//! Per-cycle change dampening for rooms that are already comfortable.
//!
//! Only rooms at setpoint without an anomaly flag are limited; anything
//! still working toward its setpoint passes through untouched.

use log::debug;

use crate::config::DabConfig;

/// Largest change allowed this cycle from `current`.
pub fn max_step(current: f64, config: &DabConfig) -> f64 {
    (current.abs() * config.max_change_fraction).max(config.min_change_step_percent)
}

/// Soft-limit `proposed` to within [`max_step`] of `current`.
pub fn limit_change(current: f64, proposed: f64, config: &DabConfig) -> f64 {
    let delta = proposed - current;
    let limit = max_step(current, config);
    if delta.abs() <= limit {
        proposed
    } else {
        current + limit.copysign(delta)
    }
}

/// Apply dampening when the room qualifies. The result always lies in
/// `[min_open_percent, 100]`.
pub fn dampen(
    current: f64,
    proposed: f64,
    reached_setpoint: bool,
    anomaly: bool,
    config: &DabConfig,
) -> f64 {
    let floor = config.min_open_percent.clamp(0.0, 100.0);
    if !config.dampening_enabled || !reached_setpoint || anomaly {
        return proposed.clamp(floor, 100.0);
    }
    let limited = limit_change(current, proposed, config).clamp(floor, 100.0);
    if limited != proposed {
        debug!("dampener: {:.1}% -> {:.1}% limited to {:.1}%", current, proposed, limited);
    }
    limited
}
