//! Sensor subsystem: the typed per-evaluation [`snapshot::RoomSnapshot`]
//! and the short-window [`trend::TrendTracker`].
//!
//! Both are filled from the device directory; neither talks to devices
//! on its own.

pub mod snapshot;
pub mod trend;
