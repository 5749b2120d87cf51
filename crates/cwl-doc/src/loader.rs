use crate::{DocumentError, DocumentRef};
use log::debug;
use serde_yaml::Value;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

/// Process-wide store of parsed CWL documents.
///
/// Every file is parsed exactly once; `get` hands out deep copies, so callers
/// may rebuild the returned trees freely without tainting the cached
/// original. Synthesized documents (e.g. wrapper workflows) can be planted
/// with `insert` and are served like on-disk files afterwards.
#[derive(Default)]
pub struct DocumentCache {
    documents: HashMap<PathBuf, Value>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the referenced document. If the reference carries a fragment,
    /// the matching `$graph` entry is returned instead of the file root.
    pub fn get(&mut self, reference: &DocumentRef) -> Result<Value, DocumentError> {
        if !self.documents.contains_key(&reference.path) {
            let document = load_document(&reference.path)?;
            debug!("caching {}", reference.path.display());
            self.documents.insert(reference.path.clone(), document);
        }

        let root = self.documents[&reference.path].clone();
        match &reference.fragment {
            None => Ok(root),
            Some(id) => find_graph_entry(&root, id).cloned().ok_or_else(|| DocumentError::FragmentMissing {
                file: reference.path.clone(),
                id: id.clone(),
            }),
        }
    }

    /// Plants a synthesized document under the given path.
    pub fn insert(&mut self, path: impl Into<PathBuf>, document: Value) {
        self.documents.insert(path.into(), document);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }
}

fn load_document(path: &Path) -> Result<Value, DocumentError> {
    if !path.exists() {
        return Err(DocumentError::DocumentNotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path).map_err(|e| DocumentError::io(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| DocumentError::Parse {
        file: path.to_path_buf(),
        source: e,
    })
}

/// Finds the `$graph` entry whose `id` equals the fragment, tolerating a
/// leading `#` on the entry side.
pub fn find_graph_entry<'a>(root: &'a Value, id: &str) -> Option<&'a Value> {
    root.get("$graph")?.as_sequence()?.iter().find(|entry| matches_id(entry, id))
}

pub fn find_graph_entry_mut<'a>(root: &'a mut Value, id: &str) -> Option<&'a mut Value> {
    root.get_mut("$graph")?.as_sequence_mut()?.iter_mut().find(|entry| matches_id(entry, id))
}

fn matches_id(entry: &Value, id: &str) -> bool {
    match entry.get("id").and_then(Value::as_str) {
        Some(entry_id) => entry_id == id || entry_id.strip_prefix('#') == Some(id),
        None => false,
    }
}
