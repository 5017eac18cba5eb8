//! Error types for the ingestion engine
//!
//! Errors are contained at the smallest unit that makes sense (record,
//! datasource, batch, process definition); these types carry enough context
//! to log the failing unit and move on.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for datastore operations
pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;

/// Engine error
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Common(#[from] recload_common::Error),

    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid archive '{name}': {reason}")]
    Archive { name: String, reason: String },

    #[error("Could not decode '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Loading datasource '{name}' timed out after {timeout:?}")]
    LoadTimeout { name: String, timeout: Duration },

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Unknown {kind} '{name}'")]
    UnknownComponent { kind: &'static str, name: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl IngestError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn archive(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Archive {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownComponent {
            kind,
            name: name.into(),
        }
    }
}

/// Datastore and connection error
#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Datastore configuration error: {0}")]
    Config(String),

    #[error("Gave up after {deadline:?}: {last}")]
    DeadlineExceeded {
        deadline: Duration,
        last: Box<DatastoreError>,
    },
}

impl DatastoreError {
    /// Whether retrying after a cooldown can plausibly succeed
    ///
    /// Backend unavailability (IO, TLS, pool exhaustion, dropped connections)
    /// is transient; configuration mistakes and rejected queries are not.
    pub fn is_transient(&self) -> bool {
        match self {
            DatastoreError::Sqlx(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            DatastoreError::Connection(_) | DatastoreError::Closed => true,
            DatastoreError::Query(_)
            | DatastoreError::Config(_)
            | DatastoreError::DeadlineExceeded { .. } => false,
        }
    }
}
