//! Application core: the balancing engine's orchestration, zero I/O.
//!
//! [`service::DabService`] drives mode detection, cycle bookkeeping,
//! target computation and the learning feedback loop. All interaction with
//! devices and storage happens through the **port traits** in [`ports`],
//! keeping this layer fully testable with mock adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
