use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Cloud sync already in progress")]
    AlreadyRunning,

    #[error("Unknown resume token {0}")]
    UnknownToken(u64),

    #[error("Malformed manifest: {0}")]
    Manifest(String),

    #[error("Directory for {root}/ is not configured")]
    MissingDirectory { root: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
