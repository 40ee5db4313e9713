//! LMDB-backed per-module store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep every cached result of
//! one source module in a single memory-mapped environment. The environment
//! directory is the module's storage location.
//!
//! # Keys
//!
//! LMDB caps keys at 511 bytes, while cache keys grow with their arguments.
//! Entries are therefore stored under the SHA-256 hex digest of the cache key.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `contains` and `get`
//! - Write transactions for `set` and `remove`
//!
//! Concurrent writers from several processes are serialized by LMDB itself,
//! but two processes computing the same key both store; the last one wins.

use std::path::{Path, PathBuf};

use fncache_core::{
    sha256_hex, BackendError, BackendKind, CacheEntry, CacheKey, FnCacheError, FnCacheResult,
};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};

use super::traits::CacheBackend;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment at {path}: {reason}")]
    EnvOpen { path: String, reason: String },

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to FnCacheError.
impl From<LmdbStoreError> for FnCacheError {
    fn from(e: LmdbStoreError) -> Self {
        FnCacheError::Backend(BackendError::Store {
            backend: BackendKind::PerModule.to_string(),
            reason: e.to_string(),
        })
    }
}

/// One LMDB environment holding a whole module's entries.
pub struct PerModuleBackend {
    /// Environment directory.
    path: PathBuf,
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Str, Bytes>,
}

impl std::fmt::Debug for PerModuleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerModuleBackend")
            .field("path", &self.path)
            .finish()
    }
}

impl PerModuleBackend {
    /// Open (or create) the store at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `map_size_mb` - Maximum size of the store in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        // SAFETY: every handle to this directory inside the process goes
        // through the backend registry, so the environment is opened once.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            env,
            db,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_key(key: &CacheKey) -> String {
        sha256_hex(key.as_str().as_bytes())
    }

    fn read_raw(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .get(&rtxn, &Self::storage_key(key))
            .map(|found| found.map(<[u8]>::to_vec))
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }
}

impl CacheBackend for PerModuleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PerModule
    }

    fn contains(&self, key: &CacheKey) -> FnCacheResult<bool> {
        Ok(self.read_raw(key)?.is_some())
    }

    fn get(&self, key: &CacheKey) -> FnCacheResult<CacheEntry> {
        match self.read_raw(key)? {
            Some(bytes) => Ok(CacheEntry::decode(&bytes)?),
            None => Err(BackendError::NotFound {
                key: key.to_string(),
            }
            .into()),
        }
    }

    fn set(&self, key: &CacheKey, entry: &CacheEntry) -> FnCacheResult<()> {
        let bytes = entry.encode()?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, &Self::storage_key(key), &bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> FnCacheResult<bool> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, &Self::storage_key(key))
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }
}
