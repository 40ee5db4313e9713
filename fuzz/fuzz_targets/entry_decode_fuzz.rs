//! Fuzz test for persisted cache entries
//!
//! Stored entries come back from disk, LMDB or a remote service and may be
//! truncated or foreign. Decoding arbitrary bytes must return an error, never
//! panic, and a decoded entry must survive re-encoding.
//!
//! Run with: cargo +nightly fuzz run entry_decode_fuzz -- -max_total_time=60

#![no_main]

use fncache_core::{is_valid, CacheEntry, Validity};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(entry) = CacheEntry::decode(data) else {
        return;
    };

    let encoded = entry.encode().expect("decoded entry should re-encode");
    let again = CacheEntry::decode(&encoded).expect("re-encoded entry should decode");
    assert_eq!(again, entry);

    // Validity checks must accept any timestamp, past or future.
    let now = chrono::Utc::now();
    assert!(is_valid(&entry, Validity::Forever, now));
    let _ = is_valid(&entry, Validity::seconds(1), now);
});
