//! Exponentially weighted moving average per rate bucket.
//!
//! The decay factor is derived from a half-life and the real time between
//! observations:
//!
//! > alpha = 1 - 0.5^(dt / half_life)
//! > value = alpha * sample + (1 - alpha) * value
//!
//! Buckets typically see one sample per day, so irregular gaps are normal
//! and a time-based alpha keeps a week-old value from counting as much as
//! yesterday's.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwmaState {
    pub value: f64,
    pub last_ms: u64,
    pub count: u32,
}

impl EwmaState {
    pub fn seeded(value: f64, at_ms: u64) -> Self {
        Self {
            value,
            last_ms: at_ms,
            count: 1,
        }
    }

    /// Fold in a new observation.
    pub fn observe(&mut self, value: f64, at_ms: u64, half_life_ms: f64) {
        let dt = at_ms.saturating_sub(self.last_ms) as f64;
        let alpha = decay_alpha(dt, half_life_ms);
        self.value = alpha * value + (1.0 - alpha) * self.value;
        self.last_ms = self.last_ms.max(at_ms);
        self.count = self.count.saturating_add(1);
    }
}

/// Smoothing factor for an observation `dt_ms` after the previous one.
///
/// Simultaneous (or out-of-order) observations weigh equally with the
/// current value.
pub fn decay_alpha(dt_ms: f64, half_life_ms: f64) -> f64 {
    if dt_ms <= 0.0 || half_life_ms <= 0.0 {
        0.5
    } else {
        1.0 - 0.5_f64.powf(dt_ms / half_life_ms)
    }
}
