//! Error types for table definitions and store configuration.

use thiserror::Error;

/// Errors raised while building table definitions or loading configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Store configuration is missing a required option or holds a bad value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Table or field name is not usable as a SQL identifier.
    #[error("invalid identifier '{0}': must be alphanumeric or underscore and not start with a digit")]
    InvalidIdentifier(String),

    /// Table definition declares no fields.
    #[error("table '{0}' declares no fields")]
    EmptyTable(String),

    /// File I/O failure while reading or writing configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenience alias for results with [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;
