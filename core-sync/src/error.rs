use provider_vault::ApiError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Service error: {0}")]
    Service(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to lock {path}: {message}")]
    Lock { path: PathBuf, message: String },

    #[error("File system error on {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Path {path} is outside {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl SyncError {
    pub fn file_system(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Service { .. } => SyncError::Service(err.to_string()),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
