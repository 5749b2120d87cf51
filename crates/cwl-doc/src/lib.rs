use serde_yaml::Value;
use std::{
    fmt::Display,
    path::{Component, Path, PathBuf},
};

pub mod emitter;
pub mod error;
pub mod idmap;
pub mod loader;

pub use emitter::OutputEmitter;
pub use error::DocumentError;
pub use idmap::IdMap;
pub use loader::DocumentCache;

/// Reference to a CWL document on disk, optionally narrowed to a single
/// `$graph` entry by its `id` field.
///
/// # Examples
///
/// ```
/// use cwl_doc::DocumentRef;
///
/// let reference = DocumentRef::parse("bundle.cwl#tool_a");
/// assert_eq!(reference.fragment.as_deref(), Some("tool_a"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub path: PathBuf,
    pub fragment: Option<String>,
}

impl DocumentRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fragment: None,
        }
    }

    pub fn with_fragment(path: impl Into<PathBuf>, fragment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fragment: Some(fragment.into()),
        }
    }

    /// Splits a raw `path#fragment` notation into its parts.
    pub fn parse(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        match raw.split_once('#') {
            Some((path, fragment)) => Self::with_fragment(path, fragment),
            None => Self::new(raw),
        }
    }

    /// Reference to the whole file this document lives in.
    pub fn root(&self) -> Self {
        Self::new(self.path.clone())
    }

    /// Resolves a `run` style reference relative to this document.
    ///
    /// A leading `#` attaches a fragment to the current base file, replacing
    /// any existing fragment. Absolute paths are taken as-is, relative paths
    /// are joined to the directory of the current document.
    pub fn resolve(&self, raw: &str) -> Self {
        if let Some(fragment) = raw.strip_prefix('#') {
            return Self::with_fragment(self.path.clone(), fragment);
        }

        let target = Self::parse(raw);
        if target.path.is_absolute() {
            return target;
        }

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        Self {
            path: dir.join(target.path),
            fragment: target.fragment,
        }
    }
}

impl Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.fragment {
            Some(fragment) => write!(f, "{}#{fragment}", self.path.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Lexically removes `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Shorthand for building YAML string keys.
pub fn key(name: &str) -> Value {
    Value::String(name.to_string())
}
