//! Process-wide table of open backend handles.
//!
//! Every memoized function resolves its backend through a [`BackendRegistry`].
//! Functions declared in the same source file with the same backend kind share
//! one handle, so a module's LMDB environment or file directory is opened
//! once per registry no matter how many functions use it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fncache_core::{
    BackendConfig, BackendError, BackendKind, FnCacheResult, FunctionId, MemoConfig,
};
use tracing::info;

use super::file_backend::PerKeyFileBackend;
use super::lmdb_backend::PerModuleBackend;
use super::location::StorageLocation;
use super::memory_backend::InMemoryBackend;
use super::remote_backend::{NetworkedBackend, RedisStore};
use super::traits::CacheBackend;

type HandleKey = (PathBuf, BackendKind);

/// Deduplicates open backend handles by (storage location, backend kind).
///
/// Entries are created on first use and live as long as the registry. Share
/// one registry per application through an `Arc`.
#[derive(Default)]
pub struct BackendRegistry {
    handles: Mutex<HashMap<HandleKey, Arc<dyn CacheBackend>>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("handles", &self.len())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the backend for `function` under `config`.
    ///
    /// An invalid configuration is rejected before any handle is opened.
    pub fn resolve(
        &self,
        function: &FunctionId,
        config: &MemoConfig,
    ) -> FnCacheResult<Arc<dyn CacheBackend>> {
        config.validate()?;
        let root = config.resolved_cache_root()?;
        let location = StorageLocation::for_function(&root, function);
        self.resolve_location(&location, &config.backend)
    }

    /// Return the handle for (`location`, kind of `backend`), opening it if
    /// this is the first request for that pair.
    ///
    /// The table stays locked while a new handle is set up, so two threads
    /// racing on the same pair open it once.
    pub fn resolve_location(
        &self,
        location: &StorageLocation,
        backend: &BackendConfig,
    ) -> FnCacheResult<Arc<dyn CacheBackend>> {
        let key = (location.path().to_path_buf(), backend.kind());
        let mut handles = self.handles.lock().map_err(|_| BackendError::LockPoisoned)?;

        if let Some(existing) = handles.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let opened = open_backend(backend, location)?;
        info!(
            kind = %backend.kind(),
            location = %location.path().display(),
            "opened cache backend"
        );
        handles.insert(key, Arc::clone(&opened));
        Ok(opened)
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Construct and set up the backend `config` describes at `location`.
pub fn open_backend(
    config: &BackendConfig,
    location: &StorageLocation,
) -> FnCacheResult<Arc<dyn CacheBackend>> {
    let backend: Arc<dyn CacheBackend> = match config {
        BackendConfig::InMemory => Arc::new(InMemoryBackend::new()),
        BackendConfig::PerModule { map_size_mb } => {
            Arc::new(PerModuleBackend::open(location.path(), *map_size_mb)?)
        }
        BackendConfig::PerKeyFile => Arc::new(PerKeyFileBackend::open(location)?),
        BackendConfig::Redis { url } => Arc::new(NetworkedBackend::for_location(
            Arc::new(RedisStore::open(url)?),
            location,
            BackendKind::Redis,
        )),
        BackendConfig::Remote(store) => Arc::new(NetworkedBackend::for_location(
            Arc::clone(store),
            location,
            BackendKind::Remote,
        )),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use fncache_core::{CacheEntry, CallArgs, KeyBuilder};
    use tempfile::TempDir;

    fn function(source: &str, name: &str) -> FunctionId {
        FunctionId::new("tests", source, name)
    }

    #[test]
    fn test_same_location_and_kind_share_handle() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let registry = BackendRegistry::new();
        let config = MemoConfig::in_memory(fncache_core::FOREVER).with_cache_root(temp_dir.path());

        let a = registry
            .resolve(&function("src/a.rs", "f"), &config)
            .expect("resolve should succeed");
        let b = registry
            .resolve(&function("src/a.rs", "g"), &config)
            .expect("resolve should succeed");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_kinds_and_locations_get_own_handles() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let registry = BackendRegistry::new();
        let memory = MemoConfig::in_memory(fncache_core::FOREVER).with_cache_root(temp_dir.path());
        let files = MemoConfig::per_key_file(fncache_core::FOREVER).with_cache_root(temp_dir.path());

        let a = registry
            .resolve(&function("src/a.rs", "f"), &memory)
            .expect("resolve should succeed");
        let b = registry
            .resolve(&function("src/a.rs", "f"), &files)
            .expect("resolve should succeed");
        let c = registry
            .resolve(&function("src/b.rs", "f"), &memory)
            .expect("resolve should succeed");

        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.kind(), BackendKind::InMemory);
        assert_eq!(b.kind(), BackendKind::PerKeyFile);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_shared_handle_sees_other_functions_entries() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let registry = BackendRegistry::new();
        let config = MemoConfig::in_memory(fncache_core::FOREVER).with_cache_root(temp_dir.path());
        let f = function("src/a.rs", "f");

        let key = KeyBuilder::build(&f, &CallArgs::new().arg(&1), false).expect("key should build");
        let entry = CacheEntry::from_value(&2).expect("entry should serialize");
        registry
            .resolve(&f, &config)
            .expect("resolve should succeed")
            .set(&key, &entry)
            .expect("set should succeed");

        let again = registry
            .resolve(&function("src/a.rs", "other"), &config)
            .expect("resolve should succeed");
        assert!(again.contains(&key).expect("contains should succeed"));
    }

    #[test]
    fn test_concurrent_resolution_opens_once() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let registry = Arc::new(BackendRegistry::new());
        let config = MemoConfig::per_module(fncache_core::FOREVER).with_cache_root(temp_dir.path());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let config = config.clone();
                thread::spawn(move || {
                    registry
                        .resolve(&function("src/shared.rs", "f"), &config)
                        .expect("resolve should succeed")
                })
            })
            .collect();

        let backends: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();
        assert!(backends.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_setup_registers_nothing() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let blocker = temp_dir.path().join("src");
        std::fs::write(&blocker, b"not a directory").expect("write should succeed");

        let registry = BackendRegistry::new();
        let config = MemoConfig::per_key_file(fncache_core::FOREVER).with_cache_root(temp_dir.path());
        let Err(err) = registry.resolve(&function("src/a.rs", "f"), &config) else {
            panic!("resolve should fail");
        };

        assert!(matches!(err, fncache_core::FnCacheError::Backend(BackendError::Io { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_config_registers_nothing() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let registry = BackendRegistry::new();
        let config = MemoConfig::per_module(fncache_core::FOREVER)
            .with_cache_root(temp_dir.path())
            .with_backend(BackendConfig::PerModule { map_size_mb: 0 });

        let Err(err) = registry.resolve(&function("src/a.rs", "f"), &config) else {
            panic!("resolve should fail");
        };

        assert!(matches!(err, fncache_core::FnCacheError::Config(_)));
        assert!(registry.is_empty());
        assert!(!temp_dir.path().join("src").exists());
    }
}
