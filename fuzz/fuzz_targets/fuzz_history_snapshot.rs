//! Fuzz target: persisted history snapshot decoding
//!
//! Feeds arbitrary bytes to `HistoryStore::from_bytes` and verifies:
//! - No panics on garbage, truncated DEFLATE streams or bad postcard data
//! - Every restored record passes validation
//! - The rebuilt index holds exactly the restored records
//! - A restored store re-encodes and decodes to the same record count
//!
//! cargo fuzz run fuzz_history_snapshot

#![no_main]

use libfuzzer_sys::fuzz_target;
use ventbalance::history::{HistoryParams, HistoryStore};

fuzz_target!(|data: &[u8]| {
    let params = HistoryParams::default();
    let Ok(store) = HistoryStore::from_bytes(data, params) else {
        return;
    };

    for r in store.records() {
        assert!(r.validate().is_ok(), "invalid record survived restore: {r:?}");
    }

    let indexed: usize = store
        .index()
        .values()
        .flat_map(|modes| modes.values())
        .flat_map(|hours| hours.iter())
        .map(Vec::len)
        .sum();
    assert_eq!(indexed, store.len());

    let bytes = store.to_bytes().expect("re-encode restored store");
    let again = HistoryStore::from_bytes(&bytes, params).expect("decode own encoding");
    assert_eq!(again.len(), store.len());
});
