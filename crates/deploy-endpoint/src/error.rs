//! Error types for deploy-endpoint

use std::path::PathBuf;

/// Result type for endpoint operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in endpoint operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP/DNS level failure while opening an endpoint
    #[error("Failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    /// Authentication rejected by the remote host
    #[error("Authentication failed for {endpoint}: {message}")]
    Auth { endpoint: String, message: String },

    /// SSH/SFTP subsystem failure
    #[error("SSH error on {context}: {source}")]
    Ssh {
        context: String,
        #[source]
        source: ssh2::Error,
    },

    /// Local filesystem failure
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File or directory missing on the endpoint
    #[error("No such path on endpoint: {path}")]
    NotFound { path: String },

    /// Shell execution requested on a transport that has no shell
    #[error("Shell execution is not available on a local endpoint")]
    ExecUnsupported,

    /// Rejected relative path (traversal, absolute)
    #[error(transparent)]
    Path(#[from] deploy_fs::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn ssh(context: impl Into<String>, source: ssh2::Error) -> Self {
        Self::Ssh {
            context: context.into(),
            source,
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Network resets and timeouts are transient; authentication,
    /// permission, and missing-path failures are permanent and surface
    /// immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::Auth { .. } | Self::NotFound { .. } | Self::ExecUnsupported | Self::Path(_) => {
                false
            }
            Self::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            Self::Ssh { source, .. } => {
                use ssh2::ErrorCode;
                match source.code() {
                    // Permission and missing-file SFTP statuses are permanent
                    ErrorCode::SFTP(3) | ErrorCode::SFTP(2) => false,
                    ErrorCode::Session(code) => {
                        // Socket-level libssh2 failures are worth a retry
                        matches!(code, -7 | -9 | -13 | -43)
                    }
                    _ => true,
                }
            }
        }
    }
}
