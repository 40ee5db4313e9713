//! Cache backend trait and usage statistics.
//!
//! This module defines the capability every storage variant implements and
//! the counters the memoization wrapper keeps.

use std::sync::atomic::{AtomicU64, Ordering};

use fncache_core::{BackendKind, CacheEntry, CacheKey, FnCacheResult};

/// Storage capability shared by every backend variant.
///
/// Implementations must be thread-safe. Consistency guarantees differ per
/// variant:
///
/// - in-memory: process-local, lock-synchronized
/// - per-module LMDB store: no multi-process writer guarantee
/// - per-key file: exclusive lock per key, first writer wins
/// - networked: whatever the remote service provides
pub trait CacheBackend: Send + Sync {
    /// The variant tag of this backend.
    fn kind(&self) -> BackendKind;

    /// Returns true if an entry is stored under `key`.
    fn contains(&self, key: &CacheKey) -> FnCacheResult<bool>;

    /// Read the entry stored under `key`.
    ///
    /// Fails with `BackendError::NotFound` when nothing is stored.
    fn get(&self, key: &CacheKey) -> FnCacheResult<CacheEntry>;

    /// Store `entry` under `key`, replacing any previous entry.
    fn set(&self, key: &CacheKey, entry: &CacheEntry) -> FnCacheResult<()>;

    /// Delete the entry stored under `key`. Returns true if one existed.
    fn remove(&self, key: &CacheKey) -> FnCacheResult<bool>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls answered from a valid stored entry.
    pub hits: u64,
    /// Calls that ran the computation.
    pub misses: u64,
    /// Computations that returned a fallback instead of a cacheable value.
    pub skips: u64,
    /// Key, lookup or store failures swallowed or propagated.
    pub failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    skips: AtomicU64,
    failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn skip(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::default();
        counters.hit();
        counters.hit();
        counters.miss();
        counters.skip();
        counters.failure();
        assert_eq!(
            counters.snapshot(),
            CacheStats {
                hits: 2,
                misses: 1,
                skips: 1,
                failures: 1,
            }
        );
    }
}
