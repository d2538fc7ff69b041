use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed artifact (label dictionary, model, cascade file).
    #[error("resource not found: {path}: {reason}")]
    ResourceNotFound { path: PathBuf, reason: String },

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("invalid input: {0}")]
    InputError(String),

    /// The model produced an index the label dictionary does not know.
    #[error("unknown class index {index} (dictionary has {classes} classes)")]
    UnknownClassIndex { index: usize, classes: usize },

    #[error("classification failed: {0}")]
    ClassificationError(String),
}

impl Error {
    pub fn resource(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::ResourceNotFound {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn classification(e: impl ToString) -> Self {
        Error::ClassificationError(e.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Error::ClassificationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
