//! Error types for modfetch
//!
//! The taxonomy mirrors how failures propagate through the engine:
//! - Per-item transfer failures never surface here; they are recorded in a job's
//!   failure map (see [`crate::types::Failure`]).
//! - Contract violations ([`JobError`]) and cache corruption ([`CacheError::MetadataConflict`])
//!   are returned to the immediate caller.
//! - Everything else (I/O, database, HTTP framing) is wrapped with enough context to
//!   tell which component produced it.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Result type alias for modfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for modfetch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "url_template")
        key: Option<String>,
    },

    /// Illegal use of the job API
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Artifact cache error
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// HTTP protocol or connection error on the download connection
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Archive extraction error
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error from the authoritative metadata client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - the worker no longer accepts commands
    #[error("shutdown in progress: worker no longer accepting work")]
    ShuttingDown,
}

/// Contract violations of the [`Job`](crate::job::Job) API
#[derive(Debug, Error)]
pub enum JobError {
    /// `add()` was called after `finalize()` or `cancel()`
    #[error("job {id} is {status} and no longer accepts items")]
    NotAccepting {
        /// The job that rejected the item
        id: JobId,
        /// The state the job was in when the item was offered
        status: JobStatus,
    },
}

/// Artifact cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Two sources disagree on a field that must have exactly one canonical value.
    ///
    /// Treated as corruption or tampering and never resolved silently.
    #[error(
        "metadata conflict for {fingerprint} on field {field}: local {local:?}, remote {remote:?}"
    )]
    MetadataConflict {
        /// Hex digest of the conflicting artifact's fingerprint
        fingerprint: String,
        /// Name of the disagreeing column
        field: &'static str,
        /// Value currently stored locally
        local: String,
        /// Value offered by the remote source
        remote: String,
    },

    /// A file could not be read as a ZIP archive
    #[error("{path} is not a valid archive: {reason}")]
    InvalidArchive {
        /// File that was inspected
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors raised by the HTTP/1.1 connection layer
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server sent something that is not a valid HTTP/1.1 response head
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The server closed the connection before a complete response head arrived
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Connecting (or the TLS handshake) failed
    #[error("failed to connect to {host}:{port}: {reason}")]
    ConnectFailed {
        /// Target host
        host: String,
        /// Target port
        port: u16,
        /// Underlying failure
        reason: String,
    },

    /// The URL-path template could not be rendered for a work item
    #[error("cannot render URL template {template:?}: {reason}")]
    InvalidTemplate {
        /// The template as configured
        template: String,
        /// What went wrong
        reason: String,
    },
}

/// Archive extraction errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The archive could not be opened or an entry could not be read
    #[error("extraction failed for {archive}: {reason}")]
    Failed {
        /// Description of the archive source (path or "<staged download>")
        archive: String,
        /// The reason extraction failed
        reason: String,
    },

    /// The extraction task panicked or was dropped
    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Whether this error is a state-invariant violation that callers must not ignore
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::Job(_) | Error::Cache(CacheError::MetadataConflict { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_mentions_id_and_state() {
        let err = Error::from(JobError::NotAccepting {
            id: JobId(7),
            status: JobStatus::Finalized,
        });
        let msg = err.to_string();
        assert!(msg.contains("job 7"), "got: {msg}");
        assert!(msg.contains("finalized"), "got: {msg}");
        assert!(err.is_contract_violation());
    }

    #[test]
    fn metadata_conflict_is_contract_violation() {
        let err = Error::from(CacheError::MetadataConflict {
            fingerprint: "abc".into(),
            field: "modid",
            local: "jei".into(),
            remote: "nei".into(),
        });
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("modid"));
    }

    #[test]
    fn invalid_archive_is_not_contract_violation() {
        let err = Error::from(CacheError::InvalidArchive {
            path: PathBuf::from("/tmp/x.jar"),
            reason: "no end of central directory".into(),
        });
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = std::io::Error::other("disk on fire").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn http_connect_error_names_target() {
        let err = Error::from(HttpError::ConnectFailed {
            host: "edge.forgecdn.net".into(),
            port: 443,
            reason: "refused".into(),
        });
        assert!(err.to_string().contains("edge.forgecdn.net:443"));
    }
}
