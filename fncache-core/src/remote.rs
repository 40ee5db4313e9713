//! Boundary of networked key/value and object stores.

use std::fmt;

use crate::error::BackendError;

/// A networked store treated as an opaque namespace/key/value service.
///
/// Implementations own their client and connection handling. Atomicity and
/// durability are whatever the service provides; fncache adds no locking.
/// `namespace` is the storage location of the memoized function (a bucket for
/// object stores, a key prefix for KV services).
pub trait RemoteStore: Send + Sync + fmt::Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    fn exists(&self, namespace: &str, key: &str) -> Result<bool, BackendError>;

    fn fetch(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    fn store(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), BackendError>;

    /// Delete one object. Returns true if it existed.
    fn delete(&self, namespace: &str, key: &str) -> Result<bool, BackendError>;
}
