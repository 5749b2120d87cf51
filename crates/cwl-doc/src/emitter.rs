use crate::{DocumentCache, DocumentError, DocumentRef, loader, normalize_path};
use log::debug;
use serde_yaml::Value;
use std::{
    fs,
    path::{Component, Path, PathBuf},
};

/// Writes rewritten documents into the output directory, mirroring their
/// location relative to the declared base directory.
///
/// Writes whose source path is not a descendant of the base directory are
/// refused with [`DocumentError::PathEscape`] before anything is created on
/// disk.
pub struct OutputEmitter {
    base_dir: PathBuf,
    out_dir: PathBuf,
}

impl OutputEmitter {
    pub fn new(base_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            out_dir: out_dir.into(),
        }
    }

    /// Location of `path` relative to the base directory.
    pub fn relative(&self, path: &Path) -> Result<PathBuf, DocumentError> {
        let path = canonical(path);
        let base = canonical(&self.base_dir);

        let relative = pathdiff::diff_paths(&path, &base).ok_or_else(|| self.escape(&path))?;
        if relative.components().any(|c| c == Component::ParentDir) {
            return Err(self.escape(&path));
        }
        Ok(relative)
    }

    /// Serializes `cwl` to its mirrored output location. For fragment
    /// references the entry is spliced into the surrounding `$graph` root
    /// (preferring an already-written output root over the cached original,
    /// so successive fragment writes accumulate).
    pub fn write(&self, reference: &DocumentRef, cwl: &Value, cache: &mut DocumentCache) -> Result<PathBuf, DocumentError> {
        let target = self.out_dir.join(self.relative(&reference.path)?);

        let document = match &reference.fragment {
            None => cwl.clone(),
            Some(id) => {
                let mut root = if target.exists() {
                    let contents = fs::read_to_string(&target).map_err(|e| DocumentError::io(&target, e))?;
                    serde_yaml::from_str(&contents).map_err(|e| DocumentError::Parse {
                        file: target.clone(),
                        source: e,
                    })?
                } else {
                    cache.get(&reference.root())?
                };
                let entry = loader::find_graph_entry_mut(&mut root, id).ok_or_else(|| DocumentError::FragmentMissing {
                    file: reference.path.clone(),
                    id: id.clone(),
                })?;
                *entry = cwl.clone();
                root
            }
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| DocumentError::io(parent, e))?;
        }
        let yaml = serde_yaml::to_string(&document)?;
        fs::write(&target, yaml).map_err(|e| DocumentError::io(&target, e))?;
        debug!("wrote {}", target.display());

        Ok(target)
    }

    fn escape(&self, path: &Path) -> DocumentError {
        DocumentError::PathEscape {
            path: path.to_path_buf(),
            base: self.base_dir.clone(),
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    // synthesized documents are not on disk, resolve their directory instead
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
        && let Ok(parent) = parent.canonicalize()
    {
        return parent.join(name);
    }
    normalize_path(path)
}
