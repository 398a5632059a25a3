//! Error types for deploy-db

use std::path::PathBuf;

/// Result type for deploy-db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during database deployment
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A statement rejected by the server; aborts the containing file
    #[error("SQL error in {file}: {message}")]
    Sql { file: String, message: String },

    /// Seed-spec level failure (parse error, bad shape, missing marker)
    #[error("Seed error for table {table}: {message}")]
    Seed { table: String, message: String },

    /// Marker region absent from a seed template file
    #[error("Markers not found in {file}: {begin} ... {end}")]
    MissingMarkers {
        file: PathBuf,
        begin: String,
        end: String,
    },

    /// Malformed tenant or seed JSON
    #[error("Invalid JSON in {file}: {source}")]
    Json {
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Tenant descriptor without the required identity field
    #[error("Tenant file {file} has no top-level \"webid\" string")]
    MissingWebid { file: PathBuf },

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport failure reaching the database host
    #[error(transparent)]
    Endpoint(#[from] deploy_endpoint::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn sql(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sql {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn seed(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Seed {
            table: table.into(),
            message: message.into(),
        }
    }
}
