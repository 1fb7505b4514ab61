//! Rate history store: learned temperature-change efficiency per room,
//! HVAC mode and hour-of-day.
//!
//! ```text
//!   append ──▶ flat list (source of truth, time-ordered)
//!                 │
//!                 ├──▶ index   room → mode → hour → [samples]
//!                 ├──▶ metadata per bucket (raw mean, dampened mean)
//!                 ├──▶ EWMA table
//!                 ├──▶ anomaly-influence table (room, hour)
//!                 ├──▶ daily aggregates
//!                 └──▶ last-known sample per (room, mode)
//! ```
//!
//! The index and per-bucket metadata are always re-derivable from the flat
//! list via [`HistoryStore::rebuild_index`]. Every table is bounded by the
//! same retention window. The last-known table is the explicit carry-forward
//! fallback that lets purge empty a bucket without losing the room's only
//! learned rate.

pub mod anomaly;
pub mod ewma;
pub mod persist;
pub mod stats;

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::DabConfig;
use crate::error::SampleError;
use crate::model::{HOURS_PER_DAY, HvacMode, MS_PER_DAY, RoomId, epoch_day, hour_before};
use anomaly::AnomalyInfluenceEntry;
use ewma::EwmaState;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// The subset of [`DabConfig`] the store needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryParams {
    pub retention_days: u32,
    /// Floor returned when nothing has been learned; never zero.
    pub min_rate: f64,
    pub outlier_min_samples: usize,
    pub outlier_k: f64,
    pub anomaly_decay_commits: u32,
    pub ewma_enabled: bool,
    pub ewma_half_life_days: f64,
    pub boost_enabled: bool,
    pub boost_window: usize,
    pub boost_trigger_ratio: f64,
    pub boost_gain: f64,
    pub boost_cap: f64,
}

impl From<&DabConfig> for HistoryParams {
    fn from(c: &DabConfig) -> Self {
        Self {
            retention_days: c.retention_days,
            min_rate: c.min_temp_change_rate,
            outlier_min_samples: c.outlier_min_samples,
            outlier_k: c.outlier_k,
            anomaly_decay_commits: c.anomaly_decay_commits,
            ewma_enabled: c.ewma_enabled,
            ewma_half_life_days: c.ewma_half_life_days,
            boost_enabled: c.boost_enabled,
            boost_window: c.boost_window,
            boost_trigger_ratio: c.boost_trigger_ratio,
            boost_gain: c.boost_gain,
            boost_cap: c.boost_cap,
        }
    }
}

impl Default for HistoryParams {
    fn default() -> Self {
        Self::from(&DabConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Records and keys
// ---------------------------------------------------------------------------

/// One observed rate sample. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRateRecord {
    pub room: RoomId,
    pub mode: HvacMode,
    pub hour: u8,
    pub sample: f64,
    pub observed_at_ms: u64,
}

impl HourlyRateRecord {
    pub fn validate(&self) -> Result<(), SampleError> {
        if self.room.as_str().trim().is_empty() {
            return Err(SampleError::MissingRoom);
        }
        if !self.mode.is_active() {
            return Err(SampleError::IdleMode);
        }
        if self.hour >= HOURS_PER_DAY {
            return Err(SampleError::HourOutOfRange);
        }
        if !self.sample.is_finite() {
            return Err(SampleError::NotFinite);
        }
        if self.sample <= 0.0 {
            return Err(SampleError::NotPositive);
        }
        if self.observed_at_ms == 0 {
            return Err(SampleError::MissingTimestamp);
        }
        Ok(())
    }

    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.room.clone(), self.mode, self.hour)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub room: RoomId,
    pub mode: HvacMode,
    pub hour: u8,
}

impl BucketKey {
    pub fn new(room: RoomId, mode: HvacMode, hour: u8) -> Self {
        Self { room, mode, hour }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexedSample {
    pub value: f64,
    pub observed_at_ms: u64,
}

pub type HourBuckets = [Vec<IndexedSample>; 24];
pub type RateIndex = BTreeMap<RoomId, BTreeMap<HvacMode, HourBuckets>>;

/// Derived statistics for one (room, mode, hour) bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectiveRateMetadata {
    pub raw_average: f64,
    /// Mean after anomaly dampening.
    pub effective_rate: f64,
    pub sample_count: usize,
    pub anomaly_flag: bool,
    pub carry_forward_used: bool,
}

/// Where a looked-up rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RateSource {
    Ewma,
    Mean,
    CarryForward { from_hour: u8 },
    /// Nothing learned; the non-zero floor rate.
    Floor,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLookup {
    pub rate: f64,
    pub source: RateSource,
    pub sample_count: usize,
    pub anomaly: bool,
    /// Multiplier applied by the adaptive boost (1.0 = none).
    pub boost: f64,
}

impl RateLookup {
    pub fn is_learned(&self) -> bool {
        self.source != RateSource::Floor
    }

    pub fn carry_forward_used(&self) -> bool {
        matches!(self.source, RateSource::CarryForward { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayKey {
    pub room: RoomId,
    pub mode: HvacMode,
    /// Days since the Unix epoch.
    pub day: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub count: u32,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl DailyAggregate {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.count = self.count.saturating_add(1);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / f64::from(self.count) }
    }
}

/// Predicted-versus-achieved rate for one finished cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub predicted: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppendOutcome {
    Committed {
        anomaly: bool,
        metadata: EffectiveRateMetadata,
    },
    /// The same sample (bucket + timestamp) was already recorded.
    Duplicate,
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    params: HistoryParams,
    records: Vec<HourlyRateRecord>,
    index: RateIndex,
    metadata: BTreeMap<BucketKey, EffectiveRateMetadata>,
    ewma: BTreeMap<BucketKey, EwmaState>,
    anomalies: BTreeMap<(RoomId, u8), AnomalyInfluenceEntry>,
    daily: BTreeMap<DayKey, DailyAggregate>,
    last_known: BTreeMap<(RoomId, HvacMode), HourlyRateRecord>,
    outcomes: BTreeMap<(RoomId, HvacMode), Vec<PredictionOutcome>>,
}

impl HistoryStore {
    pub fn new(params: HistoryParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn params(&self) -> &HistoryParams {
        &self.params
    }

    /// Swap parameters (hot config reload). Derived metadata is recomputed.
    pub fn set_params(&mut self, params: HistoryParams) {
        if self.params != params {
            self.params = params;
            self.rebuild_index();
        }
    }

    // ── Writes ────────────────────────────────────────────────

    /// Record one observed rate.
    ///
    /// Invalid samples are logged and refused. A sample is assessed against
    /// its bucket's prior samples before it joins them; an outlier is kept
    /// raw but gets an influence entry that dampens its contribution.
    pub fn append(
        &mut self,
        room: &RoomId,
        mode: HvacMode,
        hour: u8,
        sample: f64,
        observed_at_ms: u64,
    ) -> Result<AppendOutcome, SampleError> {
        let record = HourlyRateRecord {
            room: room.clone(),
            mode,
            hour,
            sample,
            observed_at_ms,
        };
        if let Err(e) = record.validate() {
            warn!(
                "history: rejected sample room={} mode={} hour={} value={}: {}",
                room, mode, hour, sample, e
            );
            return Err(e);
        }
        if let Some(newest) = self.records.last().map(|r| r.observed_at_ms) {
            let window = u64::from(self.params.retention_days) * MS_PER_DAY;
            if observed_at_ms.saturating_add(window) < newest {
                warn!(
                    "history: rejected stale sample room={} mode={} hour={} at {} (newest {})",
                    room, mode, hour, observed_at_ms, newest
                );
                return Err(SampleError::Expired);
            }
        }

        let key = record.key();
        let prior = bucket_of(&self.index, &key);
        if prior.iter().any(|s| s.observed_at_ms == observed_at_ms) {
            debug!("history: duplicate sample for {:?} at {}", key, observed_at_ms);
            return Ok(AppendOutcome::Duplicate);
        }
        let prior_values: Vec<f64> = prior.iter().map(|s| s.value).collect();
        let assessment = stats::assess_outlier(
            &prior_values,
            sample,
            self.params.outlier_k,
            self.params.outlier_min_samples,
        )
        .filter(|a| a.is_outlier);

        let pos = self
            .records
            .partition_point(|r| r.observed_at_ms <= observed_at_ms);
        self.records.insert(pos, record.clone());
        index_insert(&mut self.index, &record);
        self.add_to_daily(&record);
        self.update_last_known(&record);
        self.observe_ewma(&key, assessment.map_or(sample, |a| a.clipped), observed_at_ms);

        // A commit to this room/hour steps any live influence entry.
        let slot = (room.clone(), hour);
        let mut touched = vec![key.clone()];
        if let Some((alive, entry_mode)) = self.anomalies.get_mut(&slot).map(|e| (e.step(), e.mode)) {
            if !alive {
                debug!("history: anomaly influence expired for {} hour {}", room, hour);
                self.anomalies.remove(&slot);
            }
            touched.push(BucketKey::new(room.clone(), entry_mode, hour));
        }
        if let Some(a) = assessment {
            warn!(
                "history: outlier room={} mode={} hour={} value={:.4} median={:.4} bounds=[{:.4}, {:.4}]",
                room, mode, hour, sample, a.center, a.lower, a.upper
            );
            self.anomalies.insert(
                slot,
                AnomalyInfluenceEntry::new(
                    mode,
                    observed_at_ms,
                    a.clipped,
                    self.params.anomaly_decay_commits,
                ),
            );
        }

        let newest = self
            .records
            .last()
            .map_or(observed_at_ms, |r| r.observed_at_ms.max(observed_at_ms));
        self.purge(newest);
        for k in &touched {
            self.recompute(k);
        }

        let metadata = self
            .metadata
            .get(&key)
            .copied()
            .unwrap_or_else(|| self.effective_metadata(room, mode, hour));
        Ok(AppendOutcome::Committed {
            anomaly: assessment.is_some(),
            metadata,
        })
    }

    /// Remember how a cycle's achieved rate compared to the rate it was
    /// seeded with. Feeds the adaptive boost.
    pub fn record_outcome(&mut self, room: &RoomId, mode: HvacMode, predicted: f64, actual: f64) {
        if !(predicted.is_finite() && actual.is_finite() && predicted > 0.0 && actual > 0.0) {
            debug!("history: ignoring outcome predicted={} actual={}", predicted, actual);
            return;
        }
        let window = self.params.boost_window.max(1);
        let list = self.outcomes.entry((room.clone(), mode)).or_default();
        list.push(PredictionOutcome { predicted, actual });
        if list.len() > window {
            let excess = list.len() - window;
            list.drain(..excess);
        }
    }

    /// Drop everything older than the configured retention window.
    pub fn purge(&mut self, now_ms: u64) -> usize {
        self.purge_with_window(now_ms, self.params.retention_days)
    }

    /// Drop everything older than `days` before `now_ms`. Idempotent.
    ///
    /// The last-known table is not purged: it is the carry-forward fallback
    /// for buckets this empties.
    pub fn purge_with_window(&mut self, now_ms: u64, days: u32) -> usize {
        let window = u64::from(days) * MS_PER_DAY;
        let expired = |at_ms: u64| at_ms.saturating_add(window) < now_ms;

        let before = self.records.len();
        self.records.retain(|r| !expired(r.observed_at_ms));
        let removed = before - self.records.len();

        self.ewma.retain(|_, e| !expired(e.last_ms));
        self.daily
            .retain(|k, _| !expired((u64::from(k.day) + 1) * MS_PER_DAY - 1));

        if removed > 0 {
            info!("history: purged {} samples older than {} days", removed, days);
            self.rebuild_index();
        }
        let index = &self.index;
        self.anomalies.retain(|(room, hour), e| {
            bucket_of(index, &BucketKey::new(room.clone(), e.mode, *hour))
                .iter()
                .any(|s| s.observed_at_ms == e.sample_at_ms)
        });
        removed
    }

    /// Re-derive the index and every bucket's metadata from the flat list.
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for r in &self.records {
            index_insert(&mut self.index, r);
        }
        self.metadata.clear();
        let keys: Vec<BucketKey> = self
            .index
            .iter()
            .flat_map(|(room, modes)| {
                modes.iter().flat_map(move |(mode, hours)| {
                    hours
                        .iter()
                        .enumerate()
                        .filter(|(_, b)| !b.is_empty())
                        .map(move |(h, _)| BucketKey::new(room.clone(), *mode, h as u8))
                })
            })
            .collect();
        for k in &keys {
            self.recompute(k);
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        let params = self.params;
        *self = Self::new(params);
        info!("history: cleared");
    }

    // ── Reads ─────────────────────────────────────────────────

    /// Smoothed rate for a bucket with its provenance.
    ///
    /// EWMA (when enabled and populated) → dampened mean → carry-forward
    /// from the previous 23 hours or the last-known sample → floor rate.
    /// Pure: repeated calls with no intervening write return the same value.
    pub fn lookup(&self, room: &RoomId, mode: HvacMode, hour: u8) -> RateLookup {
        let floor = RateLookup {
            rate: self.params.min_rate,
            source: RateSource::Floor,
            sample_count: 0,
            anomaly: false,
            boost: 1.0,
        };
        if !mode.is_active() || hour >= HOURS_PER_DAY {
            return floor;
        }

        let key = BucketKey::new(room.clone(), mode, hour);
        let meta = self.metadata.get(&key);
        let ewma = self.ewma.get(&key).filter(|_| self.params.ewma_enabled);

        let (rate, source) = if let Some(e) = ewma {
            (e.value, RateSource::Ewma)
        } else if let Some(m) = meta {
            (m.effective_rate, RateSource::Mean)
        } else if let Some((value, from_hour)) = self.carry_forward(room, mode, hour) {
            debug!(
                "history: carry-forward for {} {} hour {} from hour {}",
                room, mode, hour, from_hour
            );
            (value, RateSource::CarryForward { from_hour })
        } else {
            return floor;
        };

        let boost = self.boost_factor(room, mode);
        RateLookup {
            rate: (rate * boost).max(self.params.min_rate),
            source,
            sample_count: meta.map_or(0, |m| m.sample_count),
            anomaly: meta.is_some_and(|m| m.anomaly_flag),
            boost,
        }
    }

    pub fn effective_rate(&self, room: &RoomId, mode: HvacMode, hour: u8) -> f64 {
        self.lookup(room, mode, hour).rate
    }

    /// Bucket metadata, synthesised from the lookup when the bucket is empty.
    pub fn effective_metadata(&self, room: &RoomId, mode: HvacMode, hour: u8) -> EffectiveRateMetadata {
        let key = BucketKey::new(room.clone(), mode, hour);
        if let Some(m) = self.metadata.get(&key) {
            return *m;
        }
        let lookup = self.lookup(room, mode, hour);
        EffectiveRateMetadata {
            raw_average: 0.0,
            effective_rate: lookup.rate,
            sample_count: 0,
            anomaly_flag: false,
            carry_forward_used: lookup.carry_forward_used(),
        }
    }

    /// Multiplier for systematically under-predicted rooms.
    pub fn boost_factor(&self, room: &RoomId, mode: HvacMode) -> f64 {
        if !self.params.boost_enabled {
            return 1.0;
        }
        let window = self.params.boost_window.max(1);
        let Some(list) = self.outcomes.get(&(room.clone(), mode)) else {
            return 1.0;
        };
        if list.len() < window {
            return 1.0;
        }
        let recent = &list[list.len() - window..];
        let trigger = self.params.boost_trigger_ratio;
        if !recent.iter().all(|o| o.actual >= o.predicted * trigger) {
            return 1.0;
        }
        let excess = recent
            .iter()
            .map(|o| o.actual / o.predicted - 1.0)
            .sum::<f64>()
            / window as f64;
        1.0 + (excess * self.params.boost_gain).clamp(0.0, self.params.boost_cap)
    }

    pub fn samples(&self, room: &RoomId, mode: HvacMode, hour: u8) -> &[IndexedSample] {
        bucket_of(&self.index, &BucketKey::new(room.clone(), mode, hour))
    }

    pub fn metadata(&self, room: &RoomId, mode: HvacMode, hour: u8) -> Option<EffectiveRateMetadata> {
        self.metadata.get(&BucketKey::new(room.clone(), mode, hour)).copied()
    }

    pub fn anomaly_entry(&self, room: &RoomId, hour: u8) -> Option<&AnomalyInfluenceEntry> {
        self.anomalies.get(&(room.clone(), hour))
    }

    /// The flat, time-ordered sample list.
    pub fn records(&self) -> &[HourlyRateRecord] {
        &self.records
    }

    pub fn index(&self) -> &RateIndex {
        &self.index
    }

    pub fn daily_aggregates(&self) -> impl Iterator<Item = (&DayKey, &DailyAggregate)> {
        self.daily.iter()
    }

    /// Every room with live or fallback history.
    pub fn rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.index.keys().cloned().collect();
        for (room, _) in self.last_known.keys() {
            if !rooms.contains(room) {
                rooms.push(room.clone());
            }
        }
        rooms.sort();
        rooms
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ── Internal ──────────────────────────────────────────────

    fn carry_forward(&self, room: &RoomId, mode: HvacMode, hour: u8) -> Option<(f64, u8)> {
        if let Some(buckets) = self.index.get(room).and_then(|m| m.get(&mode)) {
            for step in 1..HOURS_PER_DAY {
                let h = hour_before(hour, step);
                if let Some(s) = buckets[h as usize].last() {
                    return Some((self.dampened(room, mode, h, s), h));
                }
            }
        }
        self.last_known
            .get(&(room.clone(), mode))
            .map(|r| (r.sample, r.hour))
    }

    fn dampened(&self, room: &RoomId, mode: HvacMode, hour: u8, s: &IndexedSample) -> f64 {
        match self.anomalies.get(&(room.clone(), hour)) {
            Some(e) if e.matches(mode, s.observed_at_ms) => e.blend(s.value),
            _ => s.value,
        }
    }

    fn recompute(&mut self, key: &BucketKey) {
        let samples = bucket_of(&self.index, key);
        if samples.is_empty() {
            self.metadata.remove(key);
            return;
        }
        let anomaly = self
            .anomalies
            .get(&(key.room.clone(), key.hour))
            .filter(|e| e.mode == key.mode);

        let raw: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let mut anomaly_flag = false;
        let dampened: Vec<f64> = samples
            .iter()
            .map(|s| match anomaly {
                Some(e) if e.matches(key.mode, s.observed_at_ms) => {
                    anomaly_flag = true;
                    e.blend(s.value)
                }
                _ => s.value,
            })
            .collect();

        let raw_average = stats::mean(&raw).unwrap_or(self.params.min_rate);
        let effective_rate = stats::mean(&dampened).unwrap_or(raw_average);
        self.metadata.insert(
            key.clone(),
            EffectiveRateMetadata {
                raw_average,
                effective_rate,
                sample_count: samples.len(),
                anomaly_flag,
                carry_forward_used: false,
            },
        );
    }

    fn add_to_daily(&mut self, r: &HourlyRateRecord) {
        let key = DayKey {
            room: r.room.clone(),
            mode: r.mode,
            day: epoch_day(r.observed_at_ms),
        };
        self.daily
            .entry(key)
            .and_modify(|d| d.add(r.sample))
            .or_insert_with(|| DailyAggregate::first(r.sample));
    }

    fn update_last_known(&mut self, r: &HourlyRateRecord) {
        let slot = (r.room.clone(), r.mode);
        let newer = self
            .last_known
            .get(&slot)
            .is_none_or(|prev| prev.observed_at_ms <= r.observed_at_ms);
        if newer {
            self.last_known.insert(slot, r.clone());
        }
    }

    fn observe_ewma(&mut self, key: &BucketKey, value: f64, at_ms: u64) {
        let half_life_ms = self.params.ewma_half_life_days * MS_PER_DAY as f64;
        self.ewma
            .entry(key.clone())
            .and_modify(|e| e.observe(value, at_ms, half_life_ms))
            .or_insert_with(|| EwmaState::seeded(value, at_ms));
    }
}

fn bucket_of<'a>(index: &'a RateIndex, key: &BucketKey) -> &'a [IndexedSample] {
    index
        .get(&key.room)
        .and_then(|modes| modes.get(&key.mode))
        .and_then(|hours| hours.get(key.hour as usize))
        .map_or(&[], Vec::as_slice)
}

fn index_insert(index: &mut RateIndex, r: &HourlyRateRecord) {
    let hours = index
        .entry(r.room.clone())
        .or_default()
        .entry(r.mode)
        .or_default();
    let bucket = &mut hours[r.hour as usize];
    let pos = bucket.partition_point(|s| s.observed_at_ms <= r.observed_at_ms);
    bucket.insert(
        pos,
        IndexedSample {
            value: r.sample,
            observed_at_ms: r.observed_at_ms,
        },
    );
}
