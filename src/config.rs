//! Engine configuration parameters
//!
//! All tunable parameters for the balancing engine. Values can be
//! overridden through a [`ConfigPort`](crate::app::ports::ConfigPort)
//! implementation or hot-reloaded with `DabCommand::UpdateConfig`.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::model::HvacMode;

/// Manual mode setting. Anything other than `Auto` short-circuits detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModeOverride {
    #[default]
    Auto,
    Heating,
    Cooling,
    Idle,
}

impl ModeOverride {
    /// The forced mode, or `None` when detection should run.
    pub fn forced(self) -> Option<HvacMode> {
        match self {
            Self::Auto => None,
            Self::Heating => Some(HvacMode::Heating),
            Self::Cooling => Some(HvacMode::Cooling),
            Self::Idle => Some(HvacMode::Idle),
        }
    }
}

/// Core engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DabConfig {
    // --- Mode detection ---
    /// |duct − room| (°C) beyond which a vent votes heating or cooling
    pub duct_temp_diff_threshold_c: f64,
    pub mode_override: ModeOverride,
    /// Window (minutes) a room trend must be sustained over
    pub trend_window_minutes: u32,
    /// Net temperature change (°C) that counts as a sustained trend
    pub trend_min_delta_c: f64,

    // --- Setpoints ---
    pub default_cooling_setpoint_c: f64,
    pub default_heating_setpoint_c: f64,
    /// Distance from setpoint (°C) still considered "at setpoint"
    pub setpoint_tolerance_c: f64,

    // --- Vent targets ---
    /// Never-fully-close floor (0 disables the policy)
    pub min_open_percent: f64,
    pub close_inactive_rooms: bool,
    /// Exponential mapping base constant
    pub base_const: f64,
    /// Exponential mapping exponent constant
    pub exp_const: f64,
    /// Initial cap for minutes-to-target before any cycle history exists
    pub max_minutes_to_setpoint: f64,
    /// Samples in the rolling average of full cycle durations
    pub running_time_rolling_entries: u32,

    // --- Rate limits (°C per minute, normalised to fully open) ---
    pub min_temp_change_rate: f64,
    pub max_temp_change_rate: f64,

    // --- Cycle feedback ---
    pub min_cycle_minutes: f64,
    /// Temperature changes below this (°C) are sensor noise
    pub min_detectable_temp_change_c: f64,
    /// Vents below this opening (%) are treated as closed
    pub min_effective_open_percent: f64,
    pub efficiency_rolling_entries: u32,

    // --- Minimum combined airflow ---
    pub min_combined_flow_percent: f64,
    /// Non-motorized vents assumed open at `conventional_vent_open_percent`
    pub conventional_vent_count: u32,
    pub conventional_vent_open_percent: f64,
    pub airflow_increment_percent: f64,
    pub airflow_max_iterations: u32,

    // --- Change dampening ---
    pub dampening_enabled: bool,
    /// Maximum change per cycle as a fraction of the current opening
    pub max_change_fraction: f64,
    /// Minimum allowed step (%) so a nearly closed vent can still move
    pub min_change_step_percent: f64,

    // --- History store ---
    pub retention_days: u32,
    pub outlier_min_samples: usize,
    /// Outlier distance in MAD (or standard deviation) units
    pub outlier_k: f64,
    /// Commits over which an outlier's dampening fades out
    pub anomaly_decay_commits: u32,
    pub ewma_enabled: bool,
    pub ewma_half_life_days: f64,
    pub boost_enabled: bool,
    pub boost_window: usize,
    /// actual / predicted ratio that counts as an under-prediction
    pub boost_trigger_ratio: f64,
    pub boost_gain: f64,
    /// Upper bound for the boost as a fraction of the looked-up rate
    pub boost_cap: f64,

    // --- Timing ---
    pub poll_active_secs: u32,
    pub poll_idle_secs: u32,
    pub rebalance_interval_mins: u32,
    pub purge_interval_hours: u32,
}

impl Default for DabConfig {
    fn default() -> Self {
        Self {
            // Mode detection
            duct_temp_diff_threshold_c: 0.5,
            mode_override: ModeOverride::Auto,
            trend_window_minutes: 10,
            trend_min_delta_c: 0.3,

            // Setpoints
            default_cooling_setpoint_c: 24.0,
            default_heating_setpoint_c: 20.0,
            setpoint_tolerance_c: 0.2,

            // Vent targets
            min_open_percent: 0.0,
            close_inactive_rooms: true,
            base_const: 0.0991,
            exp_const: 2.3,
            max_minutes_to_setpoint: 60.0,
            running_time_rolling_entries: 6,

            // Rate limits
            min_temp_change_rate: 0.001,
            max_temp_change_rate: 1.5,

            // Cycle feedback
            min_cycle_minutes: 5.0,
            min_detectable_temp_change_c: 0.1,
            min_effective_open_percent: 5.0,
            efficiency_rolling_entries: 4,

            // Minimum combined airflow
            min_combined_flow_percent: 30.0,
            conventional_vent_count: 0,
            conventional_vent_open_percent: 50.0,
            airflow_increment_percent: 1.5,
            airflow_max_iterations: 500,

            // Change dampening
            dampening_enabled: true,
            max_change_fraction: 0.25,
            min_change_step_percent: 5.0,

            // History store
            retention_days: 10,
            outlier_min_samples: 4,
            outlier_k: 3.0,
            anomaly_decay_commits: 4,
            ewma_enabled: false,
            ewma_half_life_days: 3.0,
            boost_enabled: true,
            boost_window: 3,
            boost_trigger_ratio: 1.25,
            boost_gain: 0.5,
            boost_cap: 0.2,

            // Timing
            poll_active_secs: 60,  // 1/min while conditioning
            poll_idle_secs: 300,   // 1/5min while idle
            rebalance_interval_mins: 30,
            purge_interval_hours: 24,
        }
    }
}

impl DabConfig {
    /// Range-check every field. Implementations of
    /// [`ConfigPort::save`](crate::app::ports::ConfigPort::save) call this
    /// before persisting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, msg: &'static str) -> Result<(), ConfigError> {
            if ok { Ok(()) } else { Err(ConfigError::ValidationFailed(msg)) }
        }

        check(
            (0.05..=5.0).contains(&self.duct_temp_diff_threshold_c),
            "duct_temp_diff_threshold_c must be 0.05-5.0",
        )?;
        check(
            (1..=120).contains(&self.trend_window_minutes),
            "trend_window_minutes must be 1-120",
        )?;
        check(self.trend_min_delta_c > 0.0, "trend_min_delta_c must be positive")?;
        check(
            (5.0..=35.0).contains(&self.default_cooling_setpoint_c)
                && (5.0..=35.0).contains(&self.default_heating_setpoint_c),
            "default setpoints must be 5-35 C",
        )?;
        check(
            (0.0..=2.0).contains(&self.setpoint_tolerance_c),
            "setpoint_tolerance_c must be 0-2",
        )?;
        check(
            (0.0..=100.0).contains(&self.min_open_percent),
            "min_open_percent must be 0-100",
        )?;
        check(
            self.base_const > 0.0 && self.exp_const > 0.0,
            "base_const and exp_const must be positive",
        )?;
        check(
            self.max_minutes_to_setpoint >= 1.0,
            "max_minutes_to_setpoint must be at least 1",
        )?;
        check(
            self.running_time_rolling_entries > 0 && self.efficiency_rolling_entries > 0,
            "rolling entry counts must be positive",
        )?;
        check(
            self.min_temp_change_rate > 0.0
                && self.max_temp_change_rate > self.min_temp_change_rate,
            "rate limits must satisfy 0 < min < max",
        )?;
        check(self.min_cycle_minutes > 0.0, "min_cycle_minutes must be positive")?;
        check(
            self.min_detectable_temp_change_c >= 0.0,
            "min_detectable_temp_change_c must not be negative",
        )?;
        check(
            (0.0..=100.0).contains(&self.min_effective_open_percent),
            "min_effective_open_percent must be 0-100",
        )?;
        check(
            (0.0..=100.0).contains(&self.min_combined_flow_percent),
            "min_combined_flow_percent must be 0-100",
        )?;
        check(
            (0.0..=100.0).contains(&self.conventional_vent_open_percent),
            "conventional_vent_open_percent must be 0-100",
        )?;
        check(
            self.airflow_increment_percent > 0.0 && self.airflow_max_iterations > 0,
            "airflow increment and iteration cap must be positive",
        )?;
        check(
            (0.0..=1.0).contains(&self.max_change_fraction),
            "max_change_fraction must be 0-1",
        )?;
        check(
            self.min_change_step_percent >= 0.0,
            "min_change_step_percent must not be negative",
        )?;
        check(self.retention_days <= 365, "retention_days must be 0-365")?;
        check(self.outlier_min_samples >= 3, "outlier_min_samples must be at least 3")?;
        check(self.outlier_k > 0.0, "outlier_k must be positive")?;
        check(self.anomaly_decay_commits >= 1, "anomaly_decay_commits must be at least 1")?;
        check(self.ewma_half_life_days > 0.0, "ewma_half_life_days must be positive")?;
        check(
            self.boost_window > 0 && self.boost_trigger_ratio > 1.0,
            "boost_window must be positive and boost_trigger_ratio above 1",
        )?;
        check(
            (0.0..=1.0).contains(&self.boost_cap) && self.boost_gain >= 0.0,
            "boost_cap must be 0-1 and boost_gain non-negative",
        )?;
        check(
            self.poll_active_secs > 0 && self.poll_idle_secs >= self.poll_active_secs,
            "poll intervals must be positive and idle >= active",
        )?;
        check(
            self.rebalance_interval_mins > 0 && self.purge_interval_hours > 0,
            "rebalance and purge intervals must be positive",
        )?;
        Ok(())
    }

    /// Fallback setpoint for a mode when neither thermostat nor rooms provide one.
    pub fn default_setpoint(&self, mode: HvacMode) -> f64 {
        match mode {
            HvacMode::Heating => self.default_heating_setpoint_c,
            _ => self.default_cooling_setpoint_c,
        }
    }
}
