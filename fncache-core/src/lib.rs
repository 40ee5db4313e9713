//! fncache core - keys, entries, errors and configuration
//!
//! Pure data types and derivations shared by every backend. Storage and the
//! memoization wrapper live in `fncache-storage`.

pub mod config;
pub mod entry;
pub mod error;
pub mod identity;
pub mod key;
pub mod remote;

pub use config::{
    resolve_cache_root, BackendConfig, BackendKind, MemoConfig, DEFAULT_MAP_SIZE_MB,
    DEFAULT_ROOT_DIR, DISABLE_MARKER,
};
pub use entry::{is_valid, CacheEntry, Validity, DAY, FOREVER, HOUR, MINUTE, MONTH, SECOND, WEEK, YEAR};
pub use error::{BackendError, ConfigError, FnCacheError, FnCacheResult, SerializationError};
pub use identity::{anchor_source, sha256_hex, sha512_hex, FunctionId, Timestamp};
pub use key::{CacheKey, CallArgs, KeyBuilder, KEY_FORMAT_VERSION};
pub use remote::RemoteStore;
