//! Identity types for memoized functions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::path::Path;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Stable identity of a memoized function.
///
/// Built from the declaring module path and source file plus the unqualified
/// function name, so the identity survives recompilation and restarts. It never
/// depends on a runtime address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId {
    /// Declaring module, as produced by `module_path!()`.
    pub module: String,
    /// Absolute path of the declaring source file. See [`anchor_source`].
    pub source: String,
    /// Unqualified function name.
    pub name: String,
    /// Optional implementation tag. Changing it orphans every entry cached
    /// under the previous tag.
    pub version: Option<String>,
}

impl FunctionId {
    pub fn new(
        module: impl Into<String>,
        source: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            source: source.into(),
            name: name.into(),
            version: None,
        }
    }

    /// Tag the identity with an implementation version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// The fully-qualified name used as the key prefix.
    pub fn qualified_name(&self) -> String {
        match &self.version {
            Some(version) => format!("{}::{}@{}", self.module, self.name, version),
            None => format!("{}::{}", self.module, self.name),
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// Build a [`FunctionId`] for a function declared in the calling module.
///
/// ```
/// use fncache_core::{function_id, FunctionId};
///
/// let id: FunctionId = function_id!("fetch_page");
/// assert_eq!(id.name, "fetch_page");
/// assert!(std::path::Path::new(&id.source).is_absolute());
/// ```
#[macro_export]
macro_rules! function_id {
    ($name:expr) => {
        $crate::FunctionId::new(
            module_path!(),
            $crate::identity::anchor_source(env!("CARGO_MANIFEST_DIR"), file!()),
            $name,
        )
    };
}

/// Turn a `file!()` path into an absolute one rooted at the declaring
/// package's manifest directory.
///
/// `file!()` is relative to the directory cargo invoked rustc from: the
/// package itself, or the workspace root for workspace members. The workspace
/// case is detected by `file` starting with the trailing components of
/// `manifest_dir`. Two checkouts of one crate therefore never share a source
/// path. Pure path arithmetic; the file need not exist at runtime.
pub fn anchor_source(manifest_dir: &str, file: &str) -> String {
    let manifest = Path::new(manifest_dir);
    let file_path = Path::new(file);
    if file_path.is_absolute() {
        return file.to_string();
    }

    for base in manifest.ancestors().skip(1) {
        let Ok(member) = manifest.strip_prefix(base) else {
            continue;
        };
        if file_path.starts_with(member) {
            return base.join(file_path).to_string_lossy().into_owned();
        }
    }
    manifest.join(file_path).to_string_lossy().into_owned()
}

/// Compute the SHA-256 hex digest of content.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-512 hex digest of content.
pub fn sha512_hex(content: &[u8]) -> String {
    hex::encode(Sha512::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_without_version() {
        let id = FunctionId::new("app::pages", "src/pages.rs", "fetch");
        assert_eq!(id.qualified_name(), "app::pages::fetch");
        assert_eq!(id.to_string(), "app::pages::fetch");
    }

    #[test]
    fn test_qualified_name_with_version() {
        let id = FunctionId::new("app::pages", "src/pages.rs", "fetch").with_version("2");
        assert_eq!(id.qualified_name(), "app::pages::fetch@2");
    }

    #[test]
    fn test_function_id_macro_captures_location() {
        let id = function_id!("parse");
        assert_eq!(id.module, module_path!());
        assert!(Path::new(&id.source).is_absolute());
        assert!(Path::new(&id.source).ends_with("src/identity.rs"));
        assert!(Path::new(&id.source).is_file());
        assert_eq!(id.name, "parse");
        assert!(id.version.is_none());
    }

    #[test]
    fn test_anchor_source_for_single_package() {
        assert_eq!(
            anchor_source("/work/app", "src/lib.rs"),
            Path::new("/work/app").join("src/lib.rs").to_string_lossy()
        );
    }

    #[test]
    fn test_anchor_source_for_workspace_member() {
        assert_eq!(
            anchor_source("/work/repo/crates/net", "crates/net/src/lib.rs"),
            Path::new("/work/repo").join("crates/net/src/lib.rs").to_string_lossy()
        );
    }

    #[test]
    fn test_anchor_source_keeps_absolute_paths() {
        assert_eq!(anchor_source("/work/app", "/remapped/src/lib.rs"), "/remapped/src/lib.rs");
    }

    #[test]
    fn test_checkouts_of_one_crate_get_distinct_sources() {
        let v1 = anchor_source("/work/app-v1", "src/lib.rs");
        let v2 = anchor_source("/work/app-v2", "src/lib.rs");
        assert_ne!(v1, v2);
        assert!(v1.starts_with("/work/app-v1"));
        assert!(v2.starts_with("/work/app-v2"));
    }

    #[test]
    fn test_digests_are_fixed_length_hex() {
        let a = sha256_hex(b"key");
        let b = sha512_hex(b"key");
        assert_eq!(a.len(), 64);
        assert_eq!(b.len(), 128);
        assert!(b.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(b, sha512_hex(b"key"));
        assert_ne!(b, sha512_hex(b"other key"));
    }
}
