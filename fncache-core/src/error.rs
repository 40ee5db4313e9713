//! Error types for fncache operations

use thiserror::Error;

/// Serialization errors.
///
/// Raised when call arguments, a computed payload or a persisted entry cannot
/// be deterministically converted to or from its serialized form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Positional argument {position} is not serializable: {reason}")]
    Argument { position: usize, reason: String },

    #[error("Keyword argument {name} is not serializable: {reason}")]
    Keyword { name: String, reason: String },

    #[error("Payload could not be serialized: {reason}")]
    Payload { reason: String },

    #[error("Cache entry could not be decoded: {reason}")]
    Entry { reason: String },
}

/// Storage backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Cache entry not found for key {key}")]
    NotFound { key: String },

    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("{backend} store failed: {reason}")]
    Store { backend: String, reason: String },

    #[error("Remote store failed: {reason}")]
    Remote { reason: String },

    #[error("Backend lock poisoned")]
    LockPoisoned,
}

impl BackendError {
    /// Returns true if this error only signals an absent entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Build an I/O error for the given path.
    pub fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all fncache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FnCacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl FnCacheError {
    /// Returns true if this error only signals an absent entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_not_found())
    }
}

/// Result type alias for fncache operations.
pub type FnCacheResult<T> = Result<T, FnCacheError>;

// =============================================================================
// TESTS
// =============================================================================
