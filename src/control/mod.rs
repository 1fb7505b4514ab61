//! Control pipeline, pure functions over a room snapshot:
//!
//! ```text
//!  mode::detect_mode ─▶ target::compute_targets ─▶ dampener::dampen
//!                                                        │
//!       feedback::record_cycle ◀── cycle end      airflow::enforce_minimum_airflow ─▶ actuator
//! ```

pub mod airflow;
pub mod dampener;
pub mod feedback;
pub mod mode;
pub mod target;
