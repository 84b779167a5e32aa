//! Error types for the replication library.

use thiserror::Error;

use crate::codec::CodecError;
use crate::protocol::{EARLIEST_PROTOCOL_VERSION, LATEST_PROTOCOL_VERSION};

/// How much of the offending SQL statement is kept in a database error.
const SQL_CONTEXT_LIMIT: usize = 200;

/// Main error type for endpoint operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Peer negotiated a protocol version outside the supported range.
    #[error("Peer requested protocol version {peer}, but only versions {earliest} to {latest} are supported")]
    ProtocolVersion {
        peer: u32,
        earliest: u32,
        latest: u32,
    },

    /// Wire value could not be decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A decoded message did not have the shape the command requires.
    #[error("Malformed message: {0}")]
    Wire(String),

    /// Source and destination schemas disagree; the reason wording is part
    /// of the user-visible contract.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Engine reported an error for a statement we issued.
    #[error("Database error: {message}\n{sql}")]
    Database { message: String, sql: String },

    /// The peer went away: EOF mid-frame or while a response was pending.
    #[error("Connection lost")]
    ConnectionLost,

    /// Command not known, or not valid at the negotiated version.
    #[error("Unsupported command: {0}")]
    Unsupported(String),

    /// A canonical column has no expressible DDL on this engine.
    #[error("{0}")]
    ColumnDefinition(String),

    /// Invalid connection settings (bad SSL mode, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL driver error (connection setup and teardown).
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error (connection setup and teardown).
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// IO error on the wire.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Create a Database error, keeping the first part of the SQL for context.
    pub fn database(message: impl std::fmt::Display, sql: &str) -> Self {
        let sql = if sql.len() > SQL_CONTEXT_LIMIT {
            let mut end = SQL_CONTEXT_LIMIT;
            while !sql.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &sql[..end])
        } else {
            sql.to_string()
        };
        SyncError::Database {
            message: message.to_string(),
            sql,
        }
    }

    /// Create a ProtocolVersion error for an unsupported peer version.
    pub fn protocol_version(peer: u32) -> Self {
        SyncError::ProtocolVersion {
            peer,
            earliest: EARLIEST_PROTOCOL_VERSION,
            latest: LATEST_PROTOCOL_VERSION,
        }
    }

    /// Create a Wire error for a message that decoded but made no sense.
    pub fn wire(message: impl Into<String>) -> Self {
        SyncError::Wire(message.into())
    }
}

/// Result type alias for endpoint operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_truncates_sql() {
        let sql = "SELECT ".to_string() + &"x".repeat(500);
        let err = SyncError::database("boom", &sql);
        match err {
            SyncError::Database { message, sql } => {
                assert_eq!(message, "boom");
                assert_eq!(sql.len(), 203); // 200 chars plus "..."
                assert!(sql.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_database_error_keeps_short_sql() {
        let err = SyncError::database("boom", "SELECT 1");
        match err {
            SyncError::Database { sql, .. } => assert_eq!(sql, "SELECT 1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_protocol_version_message() {
        let err = SyncError::protocol_version(6);
        assert_eq!(
            err.to_string(),
            "Peer requested protocol version 6, but only versions 7 to 9 are supported"
        );
    }
}
