//! Unified error types for the balancing engine.
//!
//! A single `Error` enum that every subsystem can convert into. Nothing in
//! the control loop is fatal: these values are logged and surfaced through
//! diagnostics, never propagated out of a control cycle.

use core::fmt;

use serde::Serialize;

use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level engine error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A rate sample was rejected at the history-store boundary.
    Sample(SampleError),
    /// The persistence backend failed.
    Storage(StorageError),
    /// A persisted snapshot could not be decoded.
    Snapshot(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sample(e) => write!(f, "sample: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Snapshot(msg) => write!(f, "snapshot: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Malformed samples
// ---------------------------------------------------------------------------

/// Reasons a rate sample is refused by [`HistoryStore::append`](crate::history::HistoryStore::append).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleError {
    /// Room identifier was empty.
    MissingRoom,
    /// Samples are only recorded for heating or cooling.
    IdleMode,
    /// Hour-of-day outside `0..=23`.
    HourOutOfRange,
    /// NaN or infinite value.
    NotFinite,
    /// Zero or negative rate.
    NotPositive,
    /// Observation timestamp was zero.
    MissingTimestamp,
    /// Older than the retention window, measured from the newest record.
    Expired,
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRoom => write!(f, "missing room id"),
            Self::IdleMode => write!(f, "idle mode has no rate"),
            Self::HourOutOfRange => write!(f, "hour out of range"),
            Self::NotFinite => write!(f, "non-finite value"),
            Self::NotPositive => write!(f, "non-positive value"),
            Self::MissingTimestamp => write!(f, "missing timestamp"),
            Self::Expired => write!(f, "outside retention window"),
        }
    }
}

impl From<SampleError> for Error {
    fn from(e: SampleError) -> Self {
        Self::Sample(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::NotFound => Self::Config("not found"),
            ConfigError::Corrupted => Self::Config("corrupted"),
            ConfigError::StorageFull => Self::Storage(StorageError::Full),
            ConfigError::IoError => Self::Storage(StorageError::IoError),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
