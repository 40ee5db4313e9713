//! Per-key file store.
//!
//! Each entry lives in its own file named by the SHA-512 hex digest of the
//! cache key, inside a directory derived from the storage location. Writers
//! take a non-blocking exclusive lock on the file: when another writer already
//! holds it, the write is abandoned and the other writer's result stands.
//! Readers take a shared lock, so they never observe a half-written entry.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fncache_core::{
    sha512_hex, BackendError, BackendKind, CacheEntry, CacheKey, FnCacheResult,
};
use fs2::FileExt;
use tracing::debug;

use super::location::StorageLocation;
use super::traits::CacheBackend;

/// Suffix appended to the storage location to name the entry directory.
pub const ENTRY_DIR_SUFFIX: &str = "d";

/// Directory of one file per cache key.
#[derive(Debug)]
pub struct PerKeyFileBackend {
    dir: PathBuf,
}

impl PerKeyFileBackend {
    /// Open the store belonging to `location`, creating its directory.
    pub fn open(location: &StorageLocation) -> FnCacheResult<Self> {
        Self::open_dir(location.with_suffix(ENTRY_DIR_SUFFIX))
    }

    /// Open a store rooted directly at `dir`.
    pub fn open_dir(dir: impl Into<PathBuf>) -> FnCacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| BackendError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(sha512_hex(key.as_str().as_bytes()))
    }
}

/// Outcome of an exclusive write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Written,
    /// Another writer held the lock.
    Contended,
}

fn is_contended(err: &io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
        || err.kind() == io::ErrorKind::WouldBlock
}

/// Write `path` under a non-blocking exclusive lock.
///
/// The file is truncated only once the lock is held. If `write` fails the file
/// is removed so no partial entry is left behind.
pub(crate) fn write_exclusive<F>(path: &Path, write: F) -> Result<WriteOutcome, BackendError>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| BackendError::io(path, e))?;

    if let Err(e) = file.try_lock_exclusive() {
        if is_contended(&e) {
            return Ok(WriteOutcome::Contended);
        }
        return Err(BackendError::io(path, e));
    }

    let result = file
        .set_len(0)
        .and_then(|()| write(&mut file))
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_all());

    match result {
        Ok(()) => {
            let _ = file.unlock();
            Ok(WriteOutcome::Written)
        }
        Err(e) => {
            let _ = fs::remove_file(path);
            let _ = file.unlock();
            Err(BackendError::io(path, e))
        }
    }
}

/// Read `path` under a shared lock. `None` if it is missing or empty.
fn read_shared(path: &Path) -> Result<Option<Vec<u8>>, BackendError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BackendError::io(path, e)),
    };

    file.lock_shared().map_err(|e| BackendError::io(path, e))?;
    let mut bytes = Vec::new();
    let read = file.read_to_end(&mut bytes);
    let _ = file.unlock();
    read.map_err(|e| BackendError::io(path, e))?;

    if bytes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(bytes))
    }
}

impl CacheBackend for PerKeyFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PerKeyFile
    }

    fn contains(&self, key: &CacheKey) -> FnCacheResult<bool> {
        let path = self.entry_path(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::io(&path, e).into()),
        }
    }

    fn get(&self, key: &CacheKey) -> FnCacheResult<CacheEntry> {
        match read_shared(&self.entry_path(key))? {
            Some(bytes) => Ok(CacheEntry::decode(&bytes)?),
            None => Err(BackendError::NotFound {
                key: key.to_string(),
            }
            .into()),
        }
    }

    fn set(&self, key: &CacheKey, entry: &CacheEntry) -> FnCacheResult<()> {
        let bytes = entry.encode()?;
        let path = self.entry_path(key);
        if write_exclusive(&path, |w| w.write_all(&bytes))? == WriteOutcome::Contended {
            debug!(path = %path.display(), "entry locked by another writer, skipping store");
        }
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> FnCacheResult<bool> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::io(&path, e).into()),
        }
    }
}
