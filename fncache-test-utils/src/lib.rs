//! fncache Test Utilities
//!
//! Shared test infrastructure for the fncache workspace:
//! - Mock backends and remote stores for failure-path testing
//! - Proptest generators for call arguments
//! - Fixtures for isolated cache roots
//! - Custom assertions for fncache errors

// Re-export the in-memory object store from its source crate
pub use fncache_storage::InMemoryRemoteStore;

// Re-export core types for convenience
pub use fncache_core::{
    BackendConfig, BackendError, BackendKind, CacheEntry, CacheKey, CallArgs, ConfigError, FnCacheError,
    FnCacheResult, FunctionId, MemoConfig, RemoteStore, SerializationError, Validity, FOREVER,
};
pub use fncache_storage::{BackendRegistry, CacheBackend, Computed, FailureLog, Memoized};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// LOGGING
// ============================================================================

/// Install a fmt subscriber filtered by `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCKS
// ============================================================================

/// Counts how often a computation actually ran.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    count: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one run.
    pub fn tick(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Record one run and pass `value` through.
    pub fn run<T>(&self, value: T) -> T {
        self.tick();
        value
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Which backend operations a [`FailingBackend`] rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Everything,
    Reads,
    Writes,
}

/// Backend that fails with a storage error on the selected operations and
/// otherwise behaves like an empty store that forgets writes.
#[derive(Debug)]
pub struct FailingBackend {
    fail_on: FailOn,
    attempts: AtomicUsize,
}

impl FailingBackend {
    pub fn new(fail_on: FailOn) -> Self {
        Self {
            fail_on,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of operations attempted against the backend.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check(&self, write: bool) -> FnCacheResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fails = match self.fail_on {
            FailOn::Everything => true,
            FailOn::Reads => !write,
            FailOn::Writes => write,
        };
        if fails {
            Err(BackendError::Store {
                backend: "failing".to_string(),
                reason: "injected failure".to_string(),
            }
            .into())
        } else {
            Ok(())
        }
    }
}

impl CacheBackend for FailingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    fn contains(&self, _key: &CacheKey) -> FnCacheResult<bool> {
        self.check(false)?;
        Ok(false)
    }

    fn get(&self, key: &CacheKey) -> FnCacheResult<CacheEntry> {
        self.check(false)?;
        Err(BackendError::NotFound {
            key: key.to_string(),
        }
        .into())
    }

    fn set(&self, _key: &CacheKey, _entry: &CacheEntry) -> FnCacheResult<()> {
        self.check(true)
    }

    fn remove(&self, _key: &CacheKey) -> FnCacheResult<bool> {
        self.check(true)?;
        Ok(false)
    }
}

/// Remote store wrapper that can be taken offline.
///
/// While offline every operation fails with `BackendError::Remote`.
#[derive(Debug, Default)]
pub struct FlakyRemoteStore {
    inner: InMemoryRemoteStore,
    offline: AtomicBool,
}

impl FlakyRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryRemoteStore {
        &self.inner
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(BackendError::Remote {
                reason: "service unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl RemoteStore for FlakyRemoteStore {
    fn name(&self) -> &str {
        "flaky"
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool, BackendError> {
        self.check()?;
        self.inner.exists(namespace, key)
    }

    fn fetch(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.check()?;
        self.inner.fetch(namespace, key)
    }

    fn store(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.check()?;
        self.inner.store(namespace, key, value)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, BackendError> {
        self.check()?;
        self.inner.delete(namespace, key)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for call arguments.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;
    use std::collections::BTreeMap;

    /// A JSON scalar argument.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::from),
            "\\PC{0,8}".prop_map(Value::from),
        ]
    }

    /// A JSON argument nested at most two levels deep.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Keyword argument names.
    pub fn arb_keyword() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,8}"
    }

    /// Raw positional and keyword values of one call.
    pub fn arb_raw_args() -> impl Strategy<Value = (Vec<Value>, BTreeMap<String, Value>)> {
        (
            prop::collection::vec(arb_value(), 0..4),
            prop::collection::btree_map(arb_keyword(), arb_value(), 0..3),
        )
    }

    /// Build [`CallArgs`] from raw values.
    pub fn to_call_args(positional: &[Value], keyword: &BTreeMap<String, Value>) -> CallArgs {
        let args = positional.iter().fold(CallArgs::new(), |args, v| args.arg(v));
        keyword
            .iter()
            .fold(args, |args, (name, v)| args.kwarg(name.clone(), v))
    }

    /// Complete call arguments.
    pub fn arb_call_args() -> impl Strategy<Value = CallArgs> {
        arb_raw_args().prop_map(|(positional, keyword)| to_call_args(&positional, &keyword))
    }

    /// A validity window between one second and one day.
    pub fn arb_validity() -> impl Strategy<Value = Validity> {
        prop_oneof![
            Just(Validity::Forever),
            (1u64..86_400).prop_map(Validity::seconds),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Isolated cache roots and wrappers built on them.

    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// A temporary cache root with its own registry.
    ///
    /// Dropping the fixture deletes everything stored under the root.
    #[derive(Debug)]
    pub struct TempCacheRoot {
        dir: TempDir,
        registry: Arc<BackendRegistry>,
    }

    impl TempCacheRoot {
        pub fn new() -> Self {
            Self {
                dir: TempDir::new().expect("temp cache root should be created"),
                registry: Arc::new(BackendRegistry::new()),
            }
        }

        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        pub fn registry(&self) -> Arc<BackendRegistry> {
            Arc::clone(&self.registry)
        }

        /// Replace the registry, as a process restart would.
        pub fn restart(&mut self) {
            self.registry = Arc::new(BackendRegistry::new());
        }

        /// `config` rooted at this fixture.
        pub fn config(&self, config: MemoConfig) -> MemoConfig {
            config.with_cache_root(self.dir.path())
        }

        /// Wrap `name` declared in `source` with `config`, rooted here.
        pub fn memoized(&self, source: &str, name: &str, config: MemoConfig) -> Memoized {
            Memoized::new(
                test_function(source, name),
                self.config(config),
                self.registry(),
            )
        }
    }

    impl Default for TempCacheRoot {
        fn default() -> Self {
            Self::new()
        }
    }

    /// A function identity in the `fixtures` module.
    pub fn test_function(source: &str, name: &str) -> FunctionId {
        FunctionId::new("fixtures", source, name)
    }

    /// A wrapper over `backend` that retains failure records in memory.
    pub fn memoized_with_backend(
        config: MemoConfig,
        backend: Arc<dyn CacheBackend>,
    ) -> (Memoized, Arc<FailureLog>) {
        let log = Arc::new(FailureLog::in_memory());
        let memo = Memoized::new(
            test_function("src/fixtures.rs", "with_backend"),
            config,
            Arc::new(BackendRegistry::new()),
        )
        .with_backend(backend)
        .with_failure_log(Arc::clone(&log));
        (memo, log)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for fncache errors.

    use super::*;

    /// Assert that an FnCacheResult is a Backend error.
    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &FnCacheResult<T>) {
        match result {
            Err(FnCacheError::Backend(_)) => {}
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }

    /// Assert that an FnCacheResult is a NotFound backend error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &FnCacheResult<T>) {
        match result {
            Err(FnCacheError::Backend(BackendError::NotFound { .. })) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that an FnCacheResult is a Serialization error.
    #[track_caller]
    pub fn assert_serialization_error<T: std::fmt::Debug>(result: &FnCacheResult<T>) {
        match result {
            Err(FnCacheError::Serialization(_)) => {}
            other => panic!("Expected Serialization error, got: {:?}", other),
        }
    }

    /// Assert that an FnCacheResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &FnCacheResult<T>) {
        match result {
            Err(FnCacheError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_call_counter_is_shared_between_clones() {
        let counter = CallCounter::new();
        let clone = counter.clone();
        assert_eq!(clone.run(5), 5);
        counter.tick();
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_failing_backend_selects_operations() {
        let key = fncache_core::KeyBuilder::build(
            &fixtures::test_function("src/a.rs", "f"),
            &CallArgs::new(),
            false,
        )
        .expect("key should build");
        let entry = CacheEntry::from_value(&1).expect("entry should serialize");

        let reads = FailingBackend::new(FailOn::Reads);
        assertions::assert_backend_error(&reads.contains(&key));
        assert!(reads.set(&key, &entry).is_ok());

        let writes = FailingBackend::new(FailOn::Writes);
        assert_eq!(writes.contains(&key), Ok(false));
        assertions::assert_not_found(&writes.get(&key));
        assertions::assert_backend_error(&writes.set(&key, &entry));
        assert_eq!(writes.attempts(), 3);
    }

    #[test]
    fn test_flaky_store_goes_offline() {
        let store = FlakyRemoteStore::new();
        store.store("ns", "k", b"v").expect("store should succeed");
        store.set_offline(true);
        assert!(matches!(
            store.fetch("ns", "k"),
            Err(BackendError::Remote { .. })
        ));
        store.set_offline(false);
        assert_eq!(
            store.fetch("ns", "k").expect("fetch should succeed"),
            Some(b"v".to_vec())
        );
        assert_eq!(store.inner().object_count(), 1);
    }

    #[test]
    fn test_temp_cache_root_restart_replaces_registry() {
        let mut root = fixtures::TempCacheRoot::new();
        let before = root.registry();
        root.restart();
        assert!(!Arc::ptr_eq(&before, &root.registry()));
        assert_eq!(
            root.config(MemoConfig::default()).cache_root.as_deref(),
            Some(root.path())
        );
    }

    #[test]
    fn test_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_args_keep_their_shape(
            (positional, keyword) in generators::arb_raw_args()
        ) {
            let args = generators::to_call_args(&positional, &keyword);
            prop_assert_eq!(args.positional_len(), positional.len());
            prop_assert_eq!(args.keyword_len(), keyword.len());
        }

        #[test]
        fn prop_generated_validity_is_positive(validity in generators::arb_validity()) {
            match validity {
                Validity::Forever => {}
                Validity::Within(window) => prop_assert!(window.as_secs() >= 1),
            }
        }
    }
}
