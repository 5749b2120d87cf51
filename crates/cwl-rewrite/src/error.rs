use cwl_doc::DocumentError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("unfinished expression block starting at offset {offset}: {tail}")]
    UnterminatedExpression { offset: usize, tail: String },

    #[error("`{name}` already exists in {context}")]
    NameCollision { name: String, context: String },

    #[error("step run target has unsupported class `{0}`")]
    UnsupportedStepClass(String),

    #[error("unsupported binding: {0}")]
    UnsupportedBinding(String),

    #[error("document references itself, cycle detected at {0:?}")]
    CycleDetected(PathBuf),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
}
