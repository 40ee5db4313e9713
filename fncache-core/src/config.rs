//! Configuration types

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::entry::Validity;
use crate::error::ConfigError;
use crate::remote::RemoteStore;

/// Directory created under the home directory when no cache root is set.
pub const DEFAULT_ROOT_DIR: &str = ".fncache";

/// Presence of this file in the home directory disables caching.
pub const DISABLE_MARKER: &str = ".disable_fncache";

/// Default LMDB map size for the per-module store.
pub const DEFAULT_MAP_SIZE_MB: usize = 256;

pub const ENV_ROOT: &str = "FNCACHE_ROOT";
pub const ENV_DISABLE: &str = "FNCACHE_DISABLE";
pub const ENV_ERROR_LOG: &str = "FNCACHE_ERROR_LOG";
pub const ENV_VALIDITY_SECS: &str = "FNCACHE_VALIDITY_SECS";
pub const ENV_FAIL_SILENTLY: &str = "FNCACHE_FAIL_SILENTLY";

fn default_map_size_mb() -> usize {
    DEFAULT_MAP_SIZE_MB
}

/// Storage variant tag. Together with the storage location it identifies one
/// open backend handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    InMemory,
    PerModule,
    PerKeyFile,
    Redis,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InMemory => "in_memory",
            Self::PerModule => "per_module",
            Self::PerKeyFile => "per_key_file",
            Self::Redis => "redis",
            Self::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// Which storage variant to use and how to reach it.
#[derive(Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Process-local map. Nothing survives a restart.
    InMemory,
    /// One LMDB store per source module.
    PerModule {
        #[serde(default = "default_map_size_mb")]
        map_size_mb: usize,
    },
    /// One file per key, first writer wins.
    PerKeyFile,
    /// Redis KV service.
    Redis { url: String },
    /// Caller-supplied networked client (object store, memcache, ...).
    #[serde(skip)]
    Remote(Arc<dyn RemoteStore>),
}

impl BackendConfig {
    pub fn per_module() -> Self {
        Self::PerModule {
            map_size_mb: DEFAULT_MAP_SIZE_MB,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::InMemory => BackendKind::InMemory,
            Self::PerModule { .. } => BackendKind::PerModule,
            Self::PerKeyFile => BackendKind::PerKeyFile,
            Self::Redis { .. } => BackendKind::Redis,
            Self::Remote(_) => BackendKind::Remote,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::per_module()
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => f.write_str("InMemory"),
            Self::PerModule { map_size_mb } => f
                .debug_struct("PerModule")
                .field("map_size_mb", map_size_mb)
                .finish(),
            Self::PerKeyFile => f.write_str("PerKeyFile"),
            Self::Redis { url } => f.debug_struct("Redis").field("url", url).finish(),
            Self::Remote(store) => f.debug_tuple("Remote").field(&store.name()).finish(),
        }
    }
}

/// Memoization configuration for one wrapped function.
#[derive(Debug, Clone)]
pub struct MemoConfig {
    /// How long stored results stay usable.
    pub validity: Validity,
    /// Log and swallow backend/serialization failures instead of propagating.
    pub fail_silently: bool,
    pub backend: BackendConfig,
    /// Leave the first positional argument out of the key.
    pub ignore_instance: bool,
    /// When false every call runs the computation directly.
    pub enabled: bool,
    /// Root of all persisted stores. `None` resolves via [`resolve_cache_root`].
    pub cache_root: Option<PathBuf>,
    /// File that failure records are appended to.
    pub error_log: Option<PathBuf>,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            validity: Validity::Forever,
            fail_silently: true,
            backend: BackendConfig::default(),
            ignore_instance: false,
            enabled: true,
            cache_root: None,
            error_log: None,
        }
    }
}

/// On-disk shape of [`MemoConfig`]; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoConfigFile {
    validity_secs: Option<u64>,
    fail_silently: Option<bool>,
    backend: Option<BackendConfig>,
    ignore_instance: Option<bool>,
    enabled: Option<bool>,
    cache_root: Option<PathBuf>,
    error_log: Option<PathBuf>,
}

impl MemoConfig {
    fn preset(validity: impl Into<Validity>, backend: BackendConfig) -> Self {
        Self {
            validity: validity.into(),
            fail_silently: false,
            backend,
            ..Self::default()
        }
    }

    /// Process-local memoization. Fails loudly.
    pub fn in_memory(validity: impl Into<Validity>) -> Self {
        Self::preset(validity, BackendConfig::InMemory)
    }

    /// File-per-key store. Fails loudly.
    pub fn per_key_file(validity: impl Into<Validity>) -> Self {
        Self::preset(validity, BackendConfig::PerKeyFile)
    }

    /// Per-module LMDB store. Fails loudly.
    pub fn per_module(validity: impl Into<Validity>) -> Self {
        Self::preset(validity, BackendConfig::per_module())
    }

    /// Redis store. Fails loudly.
    pub fn redis(validity: impl Into<Validity>, url: impl Into<String>) -> Self {
        Self::preset(validity, BackendConfig::Redis { url: url.into() })
    }

    /// Caller-supplied networked store. Fails loudly.
    pub fn remote(validity: impl Into<Validity>, store: Arc<dyn RemoteStore>) -> Self {
        Self::preset(validity, BackendConfig::Remote(store))
    }

    pub fn with_validity(mut self, validity: impl Into<Validity>) -> Self {
        self.validity = validity.into();
        self
    }

    pub fn with_fail_silently(mut self, fail_silently: bool) -> Self {
        self.fail_silently = fail_silently;
        self
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_ignore_instance(mut self, ignore_instance: bool) -> Self {
        self.ignore_instance = ignore_instance;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    pub fn with_error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log = Some(path.into());
        self
    }

    /// Parse a TOML document. Missing fields keep their defaults.
    ///
    /// ```
    /// use fncache_core::{BackendKind, MemoConfig, Validity};
    ///
    /// let config = MemoConfig::from_toml_str(r#"
    ///     validity_secs = 3600
    ///     ignore_instance = true
    ///
    ///     [backend]
    ///     kind = "per_key_file"
    /// "#).unwrap();
    /// assert_eq!(config.validity, Validity::seconds(3600));
    /// assert_eq!(config.backend.kind(), BackendKind::PerKeyFile);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: MemoConfigFile = toml::from_str(text).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let defaults = Self::default();
        let config = Self {
            validity: file
                .validity_secs
                .map_or(defaults.validity, Validity::seconds),
            fail_silently: file.fail_silently.unwrap_or(defaults.fail_silently),
            backend: file.backend.unwrap_or(defaults.backend),
            ignore_instance: file.ignore_instance.unwrap_or(defaults.ignore_instance),
            enabled: file.enabled.unwrap_or(defaults.enabled),
            cache_root: file.cache_root,
            error_log: file.error_log,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply process environment overrides.
    ///
    /// Environment variables:
    /// - `FNCACHE_ROOT`: cache root directory
    /// - `FNCACHE_DISABLE`: `1`/`true`/`yes` disables caching
    /// - `FNCACHE_ERROR_LOG`: failure log file
    /// - `FNCACHE_VALIDITY_SECS`: validity window in seconds
    /// - `FNCACHE_FAIL_SILENTLY`: `true`/`false`
    ///
    /// A `.disable_fncache` file in the home directory also disables caching.
    pub fn from_env(self) -> Result<Self, ConfigError> {
        let mut config = self.apply_vars(|name| std::env::var(name).ok())?;
        if disable_marker_present() {
            config.enabled = false;
        }
        Ok(config)
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.is_empty()) {
            self.cache_root = Some(PathBuf::from(root));
        }
        if let Some(path) = lookup(ENV_ERROR_LOG).filter(|v| !v.is_empty()) {
            self.error_log = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup(ENV_DISABLE) {
            if parse_flag(ENV_DISABLE, &value)? {
                self.enabled = false;
            }
        }
        if let Some(value) = lookup(ENV_FAIL_SILENTLY) {
            self.fail_silently = parse_flag(ENV_FAIL_SILENTLY, &value)?;
        }
        if let Some(value) = lookup(ENV_VALIDITY_SECS) {
            let secs = value
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: ENV_VALIDITY_SECS.to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
            self.validity = Validity::seconds(secs);
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - a finite validity window is positive
    /// - the per-module map size is positive
    /// - a Redis URL is present and uses a redis scheme
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Validity::Within(window) = self.validity {
            if window == Duration::ZERO {
                return Err(ConfigError::InvalidValue {
                    field: "validity".to_string(),
                    value: format!("{:?}", window),
                    reason: "validity window must be positive".to_string(),
                });
            }
        }

        match &self.backend {
            BackendConfig::PerModule { map_size_mb } if *map_size_mb == 0 => {
                return Err(ConfigError::InvalidValue {
                    field: "backend.map_size_mb".to_string(),
                    value: map_size_mb.to_string(),
                    reason: "map size must be greater than 0".to_string(),
                });
            }
            BackendConfig::Redis { url } if url.is_empty() => {
                return Err(ConfigError::MissingRequired {
                    field: "backend.url".to_string(),
                });
            }
            BackendConfig::Redis { url }
                if !(url.starts_with("redis://")
                    || url.starts_with("rediss://")
                    || url.starts_with("redis+unix://")
                    || url.starts_with("unix://")) =>
            {
                return Err(ConfigError::InvalidValue {
                    field: "backend.url".to_string(),
                    value: url.clone(),
                    reason: "expected a redis:// or unix:// URL".to_string(),
                });
            }
            _ => {}
        }

        Ok(())
    }

    /// The cache root this configuration resolves to.
    pub fn resolved_cache_root(&self) -> Result<PathBuf, ConfigError> {
        resolve_cache_root(self.cache_root.as_deref())
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "expected a boolean flag".to_string(),
        }),
    }
}

/// Resolve the directory all persisted stores live under.
///
/// Order: the explicit root, then `FNCACHE_ROOT`, then `~/.fncache`.
pub fn resolve_cache_root(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(root) = explicit {
        return Ok(root.to_path_buf());
    }
    if let Some(root) = std::env::var_os(ENV_ROOT).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_ROOT_DIR))
        .ok_or_else(|| ConfigError::MissingRequired {
            field: "cache_root".to_string(),
        })
}

fn disable_marker_present() -> bool {
    dirs::home_dir().is_some_and(|home| home.join(DISABLE_MARKER).exists())
}
