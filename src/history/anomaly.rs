//! Decaying influence entries for detected outlier samples.
//!
//! One entry per (room, hour). When a new sample is flagged as an outlier
//! its raw value stays in history, but the effective rate sees a blend of
//! the clipped bound and the raw value. The blend starts fully clipped
//! (`dampening = 1.0`) and steps back toward the raw value with every later
//! commit to the same room/hour, expiring after `total_commits` commits.

use serde::{Deserialize, Serialize};

use crate::model::HvacMode;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyInfluenceEntry {
    /// Mode bucket the outlier sample lives in.
    pub mode: HvacMode,
    /// Timestamp identifying the outlier sample within its bucket.
    pub sample_at_ms: u64,
    /// Nearest outlier bound the sample is clipped toward.
    pub bound: f64,
    /// 1.0 = fully clipped, 0.0 = raw value.
    pub dampening: f64,
    pub remaining_commits: u32,
    pub total_commits: u32,
}

impl AnomalyInfluenceEntry {
    pub fn new(mode: HvacMode, sample_at_ms: u64, bound: f64, commits: u32) -> Self {
        Self {
            mode,
            sample_at_ms,
            bound,
            dampening: 1.0,
            remaining_commits: commits,
            total_commits: commits.max(1),
        }
    }

    /// Advance one commit. Returns `false` once the entry has expired.
    pub fn step(&mut self) -> bool {
        self.remaining_commits = self.remaining_commits.saturating_sub(1);
        self.dampening = f64::from(self.remaining_commits) / f64::from(self.total_commits);
        self.remaining_commits > 0
    }

    /// Whether this entry applies to the sample at `at_ms` in `mode`.
    pub fn matches(&self, mode: HvacMode, at_ms: u64) -> bool {
        self.mode == mode && self.sample_at_ms == at_ms
    }

    /// Value the outlier contributes to the effective rate.
    pub fn blend(&self, raw: f64) -> f64 {
        self.dampening * self.bound + (1.0 - self.dampening) * raw
    }
}
