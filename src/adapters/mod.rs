//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements   | Connects to                |
//! |------------|--------------|----------------------------|
//! | `clock`    | Clock        | Host wall clock / manual   |
//! | `log_sink` | EventSink    | `log` facade               |
//! | `memory`   | ConfigPort   | In-memory blob map         |
//! |            | StoragePort  |                            |
//!
//! The device directory and vent actuator are host-specific (a hub API,
//! a simulator) and are supplied by the embedding application.

pub mod clock;
pub mod log_sink;
pub mod memory;
