//! Error types for deploy-core

use std::path::PathBuf;

/// Result type for deploy-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a deployment run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or contradictory configuration; the run never begins
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Pre-build command failed; nothing destructive has happened yet
    #[error("Pre-build command failed with exit code {code}: {command}")]
    Prebuild { command: String, code: i32 },

    /// One or more file transfers failed after retries; the run finishes
    /// but exits nonzero and the cache is not written
    #[error("{failed} file transfer(s) failed")]
    Transfer { failed: usize },

    /// Endpoint-level failure (auth, DNS, SFTP subsystem)
    #[error(transparent)]
    Endpoint(#[from] deploy_endpoint::Error),

    /// Database phase failure
    #[error(transparent)]
    Db(#[from] deploy_db::Error),

    /// Filesystem primitive failure (cache writes)
    #[error(transparent)]
    Fs(#[from] deploy_fs::Error),

    /// Standard I/O error
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
