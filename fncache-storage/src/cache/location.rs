//! Storage location naming.
//!
//! Every memoized function resolves to a location derived from its declaring
//! source file, rooted under the cache root. Functions declared in the same
//! file share a location and therefore a backend handle.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use fncache_core::FunctionId;

/// Suffix appended to the sanitized source path.
pub const LOCATION_SUFFIX: &str = ".cache";

/// Stand-in for an empty source path.
const ANONYMOUS_SOURCE: &str = "_anonymous_";

/// Where one source module's cached results live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    path: PathBuf,
    namespace: String,
}

impl StorageLocation {
    /// Resolve the location of `function` under `root`.
    pub fn for_function(root: &Path, function: &FunctionId) -> Self {
        Self::for_source(root, &function.source)
    }

    /// Resolve the location of a source path under `root`.
    ///
    /// A literal `_` is doubled, `<` and `>` (synthetic sources such as
    /// `<stdin>`) become `_lt_` and `_gt_`, `:` becomes `_c_` and a `..`
    /// component becomes `_up_`. Every escape is a single `_` followed by a
    /// letter, so distinct source files never share a location. Any root or drive prefix is
    /// dropped, so the result always stays under `root`.
    pub fn for_source(root: &Path, source: &str) -> Self {
        let mut relative = PathBuf::new();
        for component in Path::new(source).components() {
            match component {
                Component::Normal(part) => {
                    relative.push(escape_component(&part.to_string_lossy()))
                }
                Component::ParentDir => relative.push("_up_"),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }
        if relative.as_os_str().is_empty() {
            relative.push(ANONYMOUS_SOURCE);
        }

        let mut name = OsString::from(relative.as_os_str());
        name.push(LOCATION_SUFFIX);
        let relative = PathBuf::from(name);

        let namespace = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Self {
            path: root.join(&relative),
            namespace,
        }
    }

    /// Absolute path of the location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root-independent name of the location, used as the remote namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The location path with `suffix` appended to its final component.
    pub fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}

fn escape_component(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '_' => out.push_str("__"),
            '<' => out.push_str("_lt_"),
            '>' => out.push_str("_gt_"),
            ':' => out.push_str("_c_"),
            c => out.push(c),
        }
    }
    out
}
