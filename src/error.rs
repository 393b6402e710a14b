use std::path::PathBuf;

use thiserror::Error;

use crate::sink::SinkState;

/// Every failure the staging layer can report.
///
/// All variants are terminal for the operation that raised them; nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("path \"{0}\" is invalid")]
    PathInvalid(String),
    #[error("path \"{0}\" does not exist")]
    NotFound(String),
    #[error("path \"{0}\" already exists")]
    AlreadyExists(String),
    #[error("path \"{path}\" conflicts with file \"{file}\" in the directory hierarchy")]
    PathConflict { path: String, file: String },
    #[error("index {index} is out of bounds for content of length {length}")]
    IndexOutOfBounds { index: usize, length: usize },
    #[error("content at path \"{0}\" has changed between the start and the end of an update")]
    ContentMutated(String),
    #[error("update handle for \"{0}\" was not produced by this tree")]
    InvalidUpdateHandle(String),
    #[error("unknown action: \"{0}\"")]
    UnknownAction(char),
    #[error("invalid glob \"{glob}\": {reason}")]
    InvalidGlob { glob: String, reason: String },
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("validation failed with {} errors", .0.len())]
    Validation(Vec<Error>),
    #[error("sink cannot commit while {0:?}")]
    SinkState(SinkState),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn io<P: Into<PathBuf>>(path: P) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }

    /// Path the error refers to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::PathInvalid(p)
            | Error::NotFound(p)
            | Error::AlreadyExists(p)
            | Error::ContentMutated(p)
            | Error::InvalidUpdateHandle(p)
            | Error::PathConflict { path: p, .. } => Some(p),
            _ => None,
        }
    }
}
