//! Storage errors for the campaign log.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Failure while reading or writing the persisted history.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("campaign log I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode campaign log: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("campaign entry {0} already exists")]
    DuplicateId(Uuid),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
