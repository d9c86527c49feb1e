//! Error types for store operations.
//!
//! Provides a unified error type covering configuration, table resolution,
//! statement execution, migration and backup/restore failures.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid configuration or table definition.
    #[error(transparent)]
    Core(#[from] normsql_core::CoreError),

    /// SQLite operation failure outside the CRUD boundary.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Table name given that was never registered.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Operation needs the live connection but the store is disconnected.
    #[error("store is not connected")]
    NotConnected,

    /// A write statement failed. `context` names the reason and the statement.
    #[error("failed to execute {context}")]
    Execution {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A read statement failed; the engine error is kept in the message.
    #[error("executing {context}: {source}")]
    Query {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Update row shares no updatable field with the table.
    #[error("no fields in record match database table {table}")]
    NoUpdatableFields { table: String },

    /// A batch row lacks a field that the first row supplied.
    #[error("row {index} inserted into {table} is missing field {field} given in the first row")]
    InconsistentRow {
        table: String,
        index: usize,
        field: String,
    },

    /// A revision step failed.
    #[error("migration to revision {revision} failed: {reason}")]
    Migration { revision: u32, reason: String },

    /// File system failure outside a snapshot copy.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot copy failed.
    #[error("copy {} to {} failed: {source}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Restore index beyond the available snapshots.
    #[error("restoration index {nth} is more than available {available}")]
    RestoreIndex { nth: usize, available: usize },

    /// A store mutex was poisoned by a panicking thread.
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

/// Convenience alias for results with [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Builds the `{why}: {sql}` context used by execution and query errors.
pub(crate) fn describe(sql: &str, why: Option<&str>) -> String {
    match why {
        Some(why) => format!("{why}: {sql}"),
        None => sql.to_string(),
    }
}
