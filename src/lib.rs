//! Ventbalance: dynamic airflow balancing for motorized HVAC vents.
//!
//! Learns how fast each room heats or cools per hour of day and sets vent
//! openings so every room reaches its setpoint around the same time.
//! Pure logic only: the host supplies the device directory, the vent
//! actuator, a clock and storage through the traits in [`app::ports`],
//! then drives [`app::service::DabService::tick`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod fsm;
pub mod history;
pub mod model;
pub mod scheduler;
pub mod sensors;
