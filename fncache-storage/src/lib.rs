//! fncache Storage - backends, registry and the memoization wrapper
//!
//! Builds on the key, entry and configuration model of `fncache-core`:
//! [`cache`] holds the storage variants and the [`BackendRegistry`] that
//! shares their handles, [`Memoized`] runs calls through them, and
//! [`FailureLog`] records what the wrapper swallowed.

pub mod cache;
pub mod failure_log;
pub mod memoize;

pub use cache::{
    open_backend, BackendRegistry, CacheBackend, CacheStats, InMemoryBackend,
    InMemoryRemoteStore, LmdbStoreError, NetworkedBackend, PerKeyFileBackend, PerModuleBackend,
    RedisStore, StorageLocation,
};
pub use failure_log::{FailureLog, FailureRecord};
pub use memoize::{Computed, Memoized};
