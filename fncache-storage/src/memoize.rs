//! The memoization wrapper.
//!
//! A [`Memoized`] wraps one function identity and runs each call through
//! lookup, validation, computation and store:
//!
//! 1. derive the key from the call arguments
//! 2. return the stored payload if the entry exists and is still valid
//! 3. otherwise run the computation
//! 4. return a [`Computed::SkipCache`] fallback without storing it, or store
//!    the fresh value and return it
//!
//! Failures in steps 1, 2 and 4 follow the `fail_silently` policy: logged and
//! treated as a miss (or a no-op store), or propagated to the caller. Errors
//! raised by the computation itself always propagate unchanged.

use std::sync::Arc;

use chrono::Utc;
use fncache_core::{
    is_valid, CacheEntry, CacheKey, CallArgs, FnCacheError, FnCacheResult, FunctionId, KeyBuilder,
    MemoConfig,
};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{BackendRegistry, CacheBackend, CacheStats};
use crate::cache::traits::StatsCounters;
use crate::failure_log::FailureLog;

/// Result of a wrapped computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Computed<T> {
    /// A result to cache and return.
    Value(T),
    /// Return `fallback` without caching it. `message` goes to the failure log.
    SkipCache { message: String, fallback: T },
}

impl<T> Computed<T> {
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    pub fn skip(message: impl Into<String>, fallback: T) -> Self {
        Self::SkipCache {
            message: message.into(),
            fallback,
        }
    }
}

/// A memoized function: its identity, configuration and backend handle.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(BackendRegistry::new());
/// let lookup = Memoized::new(function_id!("lookup"), MemoConfig::in_memory(HOUR), registry);
///
/// let value: u64 = lookup.call(&CallArgs::new().arg(&host), || {
///     Computed::value(resolve(&host))
/// })?;
/// ```
pub struct Memoized {
    function: FunctionId,
    config: MemoConfig,
    registry: Arc<BackendRegistry>,
    failures: Arc<FailureLog>,
    backend: OnceCell<Arc<dyn CacheBackend>>,
    stats: StatsCounters,
}

impl std::fmt::Debug for Memoized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("function", &self.function)
            .field("config", &self.config)
            .field("resolved", &self.backend.get().is_some())
            .finish()
    }
}

impl Memoized {
    /// Wrap `function`. The backend is resolved through `registry` on first use.
    pub fn new(function: FunctionId, config: MemoConfig, registry: Arc<BackendRegistry>) -> Self {
        let failures = match &config.error_log {
            Some(path) => FailureLog::to_file(path),
            None => FailureLog::new(),
        };
        Self {
            function,
            config,
            registry,
            failures: Arc::new(failures),
            backend: OnceCell::new(),
            stats: StatsCounters::default(),
        }
    }

    /// Share `log` instead of the log built from the configuration.
    pub fn with_failure_log(mut self, log: Arc<FailureLog>) -> Self {
        self.failures = log;
        self
    }

    /// Use `backend` directly, bypassing the registry.
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = OnceCell::with_value(backend);
        self
    }

    pub fn function(&self) -> &FunctionId {
        &self.function
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    pub fn failure_log(&self) -> &FailureLog {
        &self.failures
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// The key this wrapper derives for `args`.
    pub fn key_for(&self, args: &CallArgs) -> FnCacheResult<CacheKey> {
        Ok(KeyBuilder::build(
            &self.function,
            args,
            self.config.ignore_instance,
        )?)
    }

    /// Memoize an infallible computation.
    pub fn call<T, F>(&self, args: &CallArgs, compute: F) -> FnCacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Computed<T>,
    {
        self.try_call(args, || Ok::<_, FnCacheError>(compute()))
    }

    /// Memoize a fallible computation. Its errors are returned unchanged and
    /// nothing is stored for them.
    pub fn try_call<T, E, F>(&self, args: &CallArgs, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<FnCacheError>,
        F: FnOnce() -> Result<Computed<T>, E>,
    {
        if !self.config.enabled {
            return Ok(self.finish_uncached(compute()?));
        }

        let key = self.guard("key", self.key_for(args))?;

        if let Some(key) = &key {
            if let Some(value) = self.guard("lookup", self.lookup::<T>(key))?.flatten() {
                self.stats.hit();
                debug!(function = %self.function, "cache hit");
                return Ok(value);
            }
        }

        self.stats.miss();
        debug!(function = %self.function, "cache miss");

        match compute()? {
            Computed::SkipCache { message, fallback } => {
                self.skipped(&message);
                Ok(fallback)
            }
            Computed::Value(value) => {
                if let Some(key) = &key {
                    self.guard("store", self.store(key, &value))?;
                }
                Ok(value)
            }
        }
    }

    /// Remove the cached entry for `args`. Returns true if one existed.
    pub fn invalidate(&self, args: &CallArgs) -> FnCacheResult<bool> {
        let key = self.key_for(args)?;
        self.backend()?.remove(&key)
    }

    fn backend(&self) -> FnCacheResult<&Arc<dyn CacheBackend>> {
        self.backend
            .get_or_try_init(|| self.registry.resolve(&self.function, &self.config))
    }

    fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> FnCacheResult<Option<T>> {
        let backend = self.backend()?;
        if !backend.contains(key)? {
            return Ok(None);
        }

        let entry = match backend.get(key) {
            Ok(entry) => entry,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if !is_valid(&entry, self.config.validity, Utc::now()) {
            debug!(function = %self.function, created_at = %entry.created_at, "cache entry expired");
            return Ok(None);
        }

        Ok(Some(entry.value()?))
    }

    fn store<T: Serialize>(&self, key: &CacheKey, value: &T) -> FnCacheResult<()> {
        let entry = CacheEntry::from_value(value)?;
        self.backend()?.set(key, &entry)
    }

    /// Apply the failure policy to one stage's result.
    fn guard<V>(&self, stage: &str, result: FnCacheResult<V>) -> FnCacheResult<Option<V>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.stats.failure();
                self.failures
                    .record(format!("{} {} failed: {}", self.function, stage, e));
                if self.config.fail_silently {
                    Ok(None)
                } else {
                    warn!(function = %self.function, stage, error = %e, "cache failure propagated");
                    Err(e)
                }
            }
        }
    }

    fn skipped(&self, message: &str) {
        self.stats.skip();
        self.failures
            .record(format!("{} skipped caching: {}", self.function, message));
    }

    fn finish_uncached<T>(&self, computed: Computed<T>) -> T {
        match computed {
            Computed::Value(value) => value,
            Computed::SkipCache { message, fallback } => {
                self.skipped(&message);
                fallback
            }
        }
    }
}
