//! Networked backends.
//!
//! [`NetworkedBackend`] adapts any [`RemoteStore`] to the [`CacheBackend`]
//! contract. Remote keys are the SHA-512 hex digest of the cache key, so they
//! have a fixed length and a safe alphabet whatever the service. The namespace
//! is the storage location of the memoized function.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use fncache_core::{
    sha512_hex, BackendError, BackendKind, CacheEntry, CacheKey, FnCacheResult, RemoteStore,
};
use redis::Client;

use super::location::StorageLocation;
use super::traits::CacheBackend;

/// A [`RemoteStore`] bound to one namespace.
#[derive(Debug)]
pub struct NetworkedBackend {
    store: Arc<dyn RemoteStore>,
    namespace: String,
    kind: BackendKind,
}

impl NetworkedBackend {
    pub fn new(store: Arc<dyn RemoteStore>, namespace: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            kind,
        }
    }

    /// Bind `store` to the namespace of `location`.
    pub fn for_location(store: Arc<dyn RemoteStore>, location: &StorageLocation, kind: BackendKind) -> Self {
        Self::new(store, location.namespace(), kind)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key under which `key` is stored remotely.
    pub fn remote_key(key: &CacheKey) -> String {
        sha512_hex(key.as_str().as_bytes())
    }
}

impl CacheBackend for NetworkedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn contains(&self, key: &CacheKey) -> FnCacheResult<bool> {
        Ok(self.store.exists(&self.namespace, &Self::remote_key(key))?)
    }

    fn get(&self, key: &CacheKey) -> FnCacheResult<CacheEntry> {
        match self.store.fetch(&self.namespace, &Self::remote_key(key))? {
            Some(bytes) => Ok(CacheEntry::decode(&bytes)?),
            None => Err(BackendError::NotFound {
                key: key.to_string(),
            }
            .into()),
        }
    }

    fn set(&self, key: &CacheKey, entry: &CacheEntry) -> FnCacheResult<()> {
        let bytes = entry.encode()?;
        self.store
            .store(&self.namespace, &Self::remote_key(key), &bytes)?;
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> FnCacheResult<bool> {
        Ok(self.store.delete(&self.namespace, &Self::remote_key(key))?)
    }
}

/// Redis KV service reached over a lazily opened blocking connection.
///
/// Keys are laid out as `fncache:{namespace}:{key}`. A failed command drops
/// the connection; the next command reconnects.
pub struct RedisStore {
    client: Client,
    conn: Mutex<Option<redis::Connection>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl RedisStore {
    /// Create a store for `url`. No connection is made until first use.
    pub fn open(url: &str) -> Result<Self, BackendError> {
        let client = Client::open(url).map_err(|e| BackendError::Remote {
            reason: format!("invalid redis url {url}: {e}"),
        })?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    #[inline]
    fn full_key(namespace: &str, key: &str) -> String {
        format!("fncache:{}:{}", namespace, key)
    }

    fn run<T, F>(&self, op: &str, full_key: &str, command: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        let mut guard = self.conn.lock().map_err(|_| BackendError::LockPoisoned)?;
        if guard.is_none() {
            let conn = self.client.get_connection().map_err(|e| BackendError::Remote {
                reason: format!("failed to connect to redis: {e}"),
            })?;
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(BackendError::Remote {
                reason: "redis connection unavailable".to_string(),
            });
        };

        match command(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(key = %full_key, error = %e, "redis {} failed", op);
                *guard = None;
                Err(BackendError::Remote {
                    reason: format!("redis {op} failed: {e}"),
                })
            }
        }
    }
}

impl RemoteStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool, BackendError> {
        let full_key = Self::full_key(namespace, key);
        self.run("EXISTS", &full_key, |conn| {
            redis::cmd("EXISTS").arg(&full_key).query::<bool>(conn)
        })
    }

    fn fetch(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let full_key = Self::full_key(namespace, key);
        self.run("GET", &full_key, |conn| {
            redis::cmd("GET").arg(&full_key).query::<Option<Vec<u8>>>(conn)
        })
    }

    fn store(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let full_key = Self::full_key(namespace, key);
        self.run("SET", &full_key, |conn| {
            redis::cmd("SET").arg(&full_key).arg(value).query::<()>(conn)
        })
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, BackendError> {
        let full_key = Self::full_key(namespace, key);
        let removed = self.run("DEL", &full_key, |conn| {
            redis::cmd("DEL").arg(&full_key).query::<u64>(conn)
        })?;
        Ok(removed > 0)
    }
}

/// Object store held in process memory.
///
/// Stands in for a bucket service in tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects across all namespaces.
    pub fn object_count(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Namespaces that hold at least one object.
    pub fn namespaces(&self) -> Vec<String> {
        let Ok(objects) = self.objects.read() else {
            return Vec::new();
        };
        let mut names: Vec<String> = objects.keys().map(|(ns, _)| ns.clone()).collect();
        names.dedup();
        names
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn name(&self) -> &str {
        "in_memory_remote"
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool, BackendError> {
        let objects = self.objects.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(objects.contains_key(&(namespace.to_string(), key.to_string())))
    }

    fn fetch(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let objects = self.objects.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(objects
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn store(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let mut objects = self.objects.write().map_err(|_| BackendError::LockPoisoned)?;
        objects.insert((namespace.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, BackendError> {
        let mut objects = self.objects.write().map_err(|_| BackendError::LockPoisoned)?;
        Ok(objects
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }
}
