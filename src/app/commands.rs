//! Inbound commands to the balancing service.
//!
//! Actions requested by the outside world (a settings page, a hub
//! automation, a CLI) that the [`DabService`](super::service::DabService)
//! interprets and acts upon.

use crate::config::{DabConfig, ModeOverride};

#[derive(Debug, Clone, PartialEq)]
pub enum DabCommand {
    /// Hot-reload configuration. Rejected if it fails validation.
    UpdateConfig(DabConfig),

    /// Force a mode or hand control back to detection.
    SetModeOverride(ModeOverride),

    /// Run the retention sweep now.
    PurgeHistory,

    /// Forget every learned rate and baseline.
    ClearHistory,

    /// Close the running cycle and record its feedback immediately.
    EndCycle,
}
