//! Error types for qail-migrate.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for migration operations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// No connection profile with the requested name.
    #[error("connection not found: '{0}'")]
    ConnectionNotFound(String),

    /// Failed to open or ping the database.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A changelog or migration file could not be read.
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A changelog or migration file is not well-formed.
    #[error("could not parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// Ledger or bootstrap statement failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Forward or reverse SQL of a changeset failed.
    #[error("changeset `{id}` failed: {message}")]
    Execution { id: String, message: String },

    /// A changeset failed while migrating up, with its source file.
    #[error("error running migration `{id}` from {file}: {source}")]
    ChangeSet {
        id: String,
        file: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// Migrate direction is neither `up` nor `down`.
    #[error("Invalid instruction '{0}', please specify up or down")]
    InvalidDirection(String),

    /// The ledger lock is held by another run.
    #[error("ledger is locked by {0}")]
    Locked(String),

    /// Generator was called without a name.
    #[error("name arg missing")]
    NameArgMissing,

    /// Generator name resolves to no file name.
    #[error("invalid migration name: '{0}'")]
    InvalidName(String),

    /// The changelog lacks its prolog or wrapping element.
    #[error("invalid changelog format: {}", .0.display())]
    InvalidChangelogFormat(PathBuf),

    /// Generator target already exists.
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
}

impl MigrateError {
    /// Create an IO error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error for the given path.
    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create an execution error for a changeset.
    pub fn execution(id: impl Into<String>, message: impl ToString) -> Self {
        Self::Execution {
            id: id.into(),
            message: message.to_string(),
        }
    }

    /// True when this is an IO error for a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrateError>;
