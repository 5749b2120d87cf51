use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document {0:?} does not exist")]
    DocumentNotFound(PathBuf),

    #[error("YAML parsing of {file:?} failed: {source}")]
    Parse {
        file: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no $graph entry with id `{id}` in {file:?}")]
    FragmentMissing { file: PathBuf, id: String },

    #[error("cannot write {path:?}, it is outside of the base directory {base:?}")]
    PathEscape { path: PathBuf, base: PathBuf },

    #[error("accessing {file:?} failed: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DocumentError {
    pub(crate) fn io(file: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DocumentError::Io { file: file.into(), source }
    }
}
