//! Cache backends and the registry that shares them.
//!
//! Four storage variants implement [`CacheBackend`]:
//!
//! | Variant | Durability | Writers |
//! |---|---|---|
//! | [`InMemoryBackend`] | process lifetime | lock-synchronized map |
//! | [`PerModuleBackend`] | one LMDB store per source module | last writer wins, multi-process use unsupported |
//! | [`PerKeyFileBackend`] | one file per key | first writer wins |
//! | [`NetworkedBackend`] | delegated to the service | delegated to the service |
//!
//! Each memoized function maps to a [`StorageLocation`] derived from its
//! declaring source file. The [`BackendRegistry`] opens at most one handle per
//! (location, kind) pair.
//!
//! # Example
//!
//! ```ignore
//! let registry = BackendRegistry::new();
//! let config = MemoConfig::per_key_file(HOUR);
//! let backend = registry.resolve(&function_id!("lookup"), &config)?;
//! if backend.contains(&key)? {
//!     let entry = backend.get(&key)?;
//! }
//! ```

pub mod file_backend;
pub mod lmdb_backend;
pub mod location;
pub mod memory_backend;
pub mod registry;
pub mod remote_backend;
pub mod traits;

pub use file_backend::PerKeyFileBackend;
pub use lmdb_backend::{LmdbStoreError, PerModuleBackend};
pub use location::StorageLocation;
pub use memory_backend::InMemoryBackend;
pub use registry::{open_backend, BackendRegistry};
pub use remote_backend::{InMemoryRemoteStore, NetworkedBackend, RedisStore};
pub use traits::{CacheBackend, CacheStats};
