//! Port traits: the hexagonal boundary between the balancing engine and
//! the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ DabService (domain)
//! ```
//!
//! Driven adapters (device directory, vent actuator, event sinks, storage,
//! clock) implement these traits. The [`DabService`](super::service::DabService)
//! consumes them via generics, so the engine never performs network I/O.

use crate::config::DabConfig;
use crate::model::{HvacMode, RoomId, VentId};

// ───────────────────────────────────────────────────────────────
// Device directory (driven adapter: devices → engine)
// ───────────────────────────────────────────────────────────────

/// A room and the vents it contains, as registered in the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDescriptor {
    pub room: RoomId,
    pub vents: Vec<VentId>,
    /// Relative airflow weight of each vent (same order as `vents`).
    /// `None` means every vent counts equally.
    pub vent_weights: Option<Vec<f64>>,
}

/// Read-side port: the engine calls this to obtain readings and setpoints.
///
/// Every reading may be unavailable; the engine skips missing values and
/// never substitutes zero.
pub trait DeviceDirectory {
    /// Every room with at least one controllable vent.
    fn rooms(&self) -> Vec<RoomDescriptor>;

    /// Best available room temperature near `vent` (°C).
    fn room_temperature(&self, vent: &VentId) -> Option<f64>;

    /// Supply-duct temperature measured at `vent` (°C).
    fn duct_temperature(&self, vent: &VentId) -> Option<f64>;

    /// The room's own configured setpoint, if any.
    fn setpoint(&self, room: &RoomId) -> Option<f64>;

    /// Whether the room is occupied / enabled for conditioning.
    fn is_room_active(&self, room: &RoomId) -> bool;

    /// Last reported opening of `vent` (0–100).
    fn current_open_percent(&self, vent: &VentId) -> u8;

    /// Operating state reported by an external thermostat, if one is configured.
    fn thermostat_operating_state(&self) -> Option<HvacMode> {
        None
    }

    /// Thermostat setpoint for `mode`, if a thermostat is configured.
    fn thermostat_setpoint(&self, _mode: HvacMode) -> Option<f64> {
        None
    }
}

// ───────────────────────────────────────────────────────────────
// Vent actuator (driven adapter: engine → devices)
// ───────────────────────────────────────────────────────────────

/// Write-side port. Calls are fire-and-forget; verifying that the vent
/// reached its target is the adapter's business.
pub trait VentActuator {
    fn set_open_percent(&mut self, vent: &VentId, percent: u8);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: engine → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The engine emits structured [`EngineEvent`](super::events::EngineEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::EngineEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Wall-clock access. Hour-of-day is local time as the household sees it.
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Local hour-of-day (0–23) for a timestamp.
    fn hour_of_day(&self, at_ms: u64) -> u8;
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads and persists engine configuration.
///
/// Implementations MUST call [`DabConfig::validate`] before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Returns [`DabConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<DabConfig, ConfigError>;

    fn save(&self, config: &DabConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port
// ───────────────────────────────────────────────────────────────

/// Persistent key-value blob storage for learned history and baselines.
///
/// Write operations MUST be atomic: a reader sees either the previous blob
/// or the new one, never a partial write.
pub trait StoragePort {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the event inbox)
// ───────────────────────────────────────────────────────────────

/// Callback the [`Scheduler`](crate::scheduler::Scheduler) invokes when a
/// timer fires. The service implements it by pushing into its inbox.
pub trait SchedulerDelegate {
    fn on_timer_fired(&mut self, timer: crate::scheduler::Timer);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first start).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    StorageFull,
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
