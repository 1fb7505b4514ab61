//! Snapshot persistence for the history store.
//!
//! Blob layout: one header byte followed by a postcard-encoded
//! [`HistorySnapshot`].
//!
//! | Header | Payload                     |
//! |--------|-----------------------------|
//! | `0x00` | raw postcard bytes          |
//! | `0x01` | DEFLATE-compressed postcard |
//!
//! Only the flat record list and the tables that cannot be re-derived from
//! it are stored. The index and per-bucket metadata are rebuilt on load.

use log::{info, warn};
use miniz_oxide::deflate::compress_to_vec;
use miniz_oxide::inflate::decompress_to_vec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::anomaly::AnomalyInfluenceEntry;
use super::ewma::EwmaState;
use super::{
    BucketKey, DailyAggregate, DayKey, HistoryParams, HistoryStore, HourlyRateRecord,
    PredictionOutcome,
};
use crate::app::ports::{StorageError, StoragePort};
use crate::error::{Error, Result};
use crate::model::{HvacMode, RoomId};

pub const HISTORY_NAMESPACE: &str = "dab";
pub const HISTORY_KEY: &str = "history";

const SNAPSHOT_VERSION: u8 = 1;
const HEADER_RAW: u8 = 0;
const HEADER_DEFLATE: u8 = 1;
/// Payloads below this size are stored raw.
const COMPRESS_THRESHOLD: usize = 128;
const COMPRESSION_LEVEL: u8 = 6;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub version: u8,
    pub records: Vec<HourlyRateRecord>,
    pub last_known: Vec<HourlyRateRecord>,
    pub ewma: Vec<(BucketKey, EwmaState)>,
    pub anomalies: Vec<((RoomId, u8), AnomalyInfluenceEntry)>,
    pub daily: Vec<(DayKey, DailyAggregate)>,
    pub outcomes: Vec<((RoomId, HvacMode), Vec<PredictionOutcome>)>,
}

impl HistoryStore {
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            version: SNAPSHOT_VERSION,
            records: self.records.clone(),
            last_known: self.last_known.values().cloned().collect(),
            ewma: self.ewma.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            anomalies: self.anomalies.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            daily: self.daily.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            outcomes: self
                .outcomes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Restore from a snapshot. Records that fail validation are dropped.
    pub fn from_snapshot(snapshot: HistorySnapshot, params: HistoryParams) -> Self {
        let mut store = Self::new(params);
        let total = snapshot.records.len();
        store.records = snapshot
            .records
            .into_iter()
            .filter(|r| r.validate().is_ok())
            .collect();
        store.records.sort_by_key(|r| r.observed_at_ms);
        let dropped = total - store.records.len();
        if dropped > 0 {
            warn!("history: dropped {} invalid records from snapshot", dropped);
        }

        store.last_known = snapshot
            .last_known
            .into_iter()
            .filter(|r| r.validate().is_ok())
            .map(|r| ((r.room.clone(), r.mode), r))
            .collect();
        store.ewma = snapshot
            .ewma
            .into_iter()
            .filter(|(_, e)| e.value.is_finite())
            .collect();
        store.anomalies = snapshot.anomalies.into_iter().collect();
        store.daily = snapshot.daily.into_iter().collect();
        store.outcomes = snapshot.outcomes.into_iter().collect();
        store.rebuild_index();
        store
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8], params: HistoryParams) -> Result<Self> {
        from_bytes(bytes, params)
    }

    pub fn save(&self, storage: &mut impl StoragePort) -> Result<()> {
        save(self, storage)
    }

    pub fn load(storage: &impl StoragePort, params: HistoryParams) -> Result<Self> {
        load(storage, params)
    }
}

// ── Blob codec ────────────────────────────────────────────────

/// Encode any serde value with the header + optional DEFLATE layout.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload =
        postcard::to_allocvec(value).map_err(|_| Error::Snapshot("postcard encode failed"))?;
    let mut out = Vec::with_capacity(payload.len() + 1);
    if payload.len() >= COMPRESS_THRESHOLD {
        let compressed = compress_to_vec(&payload, COMPRESSION_LEVEL);
        if compressed.len() < payload.len() {
            out.push(HEADER_DEFLATE);
            out.extend_from_slice(&compressed);
            return Ok(out);
        }
    }
    out.push(HEADER_RAW);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (&header, body) = bytes.split_first().ok_or(Error::Snapshot("empty blob"))?;
    let inflated;
    let payload = match header {
        HEADER_RAW => body,
        HEADER_DEFLATE => {
            inflated = decompress_to_vec(body).map_err(|e| {
                warn!("history: DEFLATE error: {:?}", e);
                Error::Snapshot("inflate failed")
            })?;
            inflated.as_slice()
        }
        _ => return Err(Error::Snapshot("unknown header")),
    };
    postcard::from_bytes(payload).map_err(|_| Error::Snapshot("postcard decode failed"))
}

pub fn to_bytes(store: &HistoryStore) -> Result<Vec<u8>> {
    encode(&store.snapshot())
}

pub fn from_bytes(bytes: &[u8], params: HistoryParams) -> Result<HistoryStore> {
    let snapshot: HistorySnapshot = decode(bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(Error::Snapshot("unsupported snapshot version"));
    }
    Ok(HistoryStore::from_snapshot(snapshot, params))
}

// ── Storage ───────────────────────────────────────────────────

pub fn save(store: &HistoryStore, storage: &mut impl StoragePort) -> Result<()> {
    let bytes = to_bytes(store)?;
    storage.write(HISTORY_NAMESPACE, HISTORY_KEY, &bytes)?;
    info!("history: saved {} samples ({} bytes)", store.len(), bytes.len());
    Ok(())
}

/// Load the persisted store; a missing blob yields an empty store.
pub fn load(storage: &impl StoragePort, params: HistoryParams) -> Result<HistoryStore> {
    match storage.read(HISTORY_NAMESPACE, HISTORY_KEY) {
        Ok(bytes) => {
            let store = from_bytes(&bytes, params)?;
            info!("history: loaded {} samples", store.len());
            Ok(store)
        }
        Err(StorageError::NotFound) => Ok(HistoryStore::new(params)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000;

    fn populated() -> HistoryStore {
        let mut s = HistoryStore::new(HistoryParams::default());
        let r = RoomId::new("den");
        for i in 0..6u64 {
            s.append(&r, HvacMode::Cooling, 9, 1.0, T0 + i * 1000).unwrap();
        }
        s.append(&r, HvacMode::Cooling, 9, 10.0, T0 + 10_000).unwrap();
        s.record_outcome(&r, HvacMode::Cooling, 0.2, 0.3);
        s
    }

    #[test]
    fn snapshot_restores_rates_and_anomaly() {
        let s = populated();
        let bytes = to_bytes(&s).unwrap();
        let restored = from_bytes(&bytes, HistoryParams::default()).unwrap();
        let r = RoomId::new("den");
        assert_eq!(restored.len(), s.len());
        assert_eq!(restored.index(), s.index());
        assert_eq!(
            restored.lookup(&r, HvacMode::Cooling, 9),
            s.lookup(&r, HvacMode::Cooling, 9)
        );
        assert!(restored.anomaly_entry(&r, 9).is_some());
    }

    #[test]
    fn large_snapshots_are_compressed() {
        let bytes = to_bytes(&populated()).unwrap();
        assert_eq!(bytes[0], HEADER_DEFLATE);
    }

    #[test]
    fn small_payload_stays_raw() {
        let bytes = encode(&7u32).unwrap();
        assert_eq!(bytes[0], HEADER_RAW);
        assert_eq!(decode::<u32>(&bytes).unwrap(), 7);
    }

    #[test]
    fn invalid_records_are_dropped_on_load() {
        let mut snap = populated().snapshot();
        snap.records.push(HourlyRateRecord {
            room: RoomId::new("den"),
            mode: HvacMode::Cooling,
            hour: 30,
            sample: -1.0,
            observed_at_ms: T0,
        });
        let restored = HistoryStore::from_snapshot(snap, HistoryParams::default());
        assert_eq!(restored.len(), 7);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(from_bytes(&[], HistoryParams::default()).is_err());
        assert!(from_bytes(&[9, 1, 2], HistoryParams::default()).is_err());
        assert!(from_bytes(&[1, 0xff, 0xff], HistoryParams::default()).is_err());
    }
}
