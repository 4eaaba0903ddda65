use thiserror::Error;

/// Errors raised while executing commands or materializing rows.
#[derive(Error, Debug)]
pub enum Error {
    /// The provider was built from unusable settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure reported by the SQLite engine, passed through unchanged.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Failure writing to the attached command log.
    #[error("Command log error: {0}")]
    Io(#[from] std::io::Error),

    /// A non-null value cannot be represented as the requested type.
    #[error("Cannot convert {value} to {target}")]
    Conversion { value: String, target: &'static str },

    #[error("'{name}' is not a member of enum {target}")]
    UnknownEnumName { name: String, target: &'static str },

    #[error("Invalid date-time: {0}")]
    InvalidDateTime(String),

    #[error("Invalid GUID: {0}")]
    InvalidGuid(String),

    #[error("Command declares {expected} parameters but {actual} values were supplied")]
    ParameterArity { expected: usize, actual: usize },

    #[error("Command text has no placeholder named {0}")]
    UnknownParameter(String),

    #[error("Command expects {expected} result columns but the statement returns {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("Column ordinal {ordinal} out of range ({count} columns)")]
    ColumnOutOfRange { ordinal: usize, count: usize },

    /// A value was read while the reader was not positioned on a row.
    #[error("Reader is not positioned on a row")]
    NoCurrentRow,

    #[error("Cursor has been closed")]
    CursorClosed,

    #[error("Connection is not open")]
    ConnectionClosed,

    /// The connection could not be reopened or closed because it is still borrowed.
    #[error("Connection is in use")]
    ConnectionBusy,

    #[error("Unknown SQL type name: {0}")]
    UnknownTypeName(String),

    #[error("Invalid type declaration: {0}")]
    InvalidTypeDeclaration(String),

    /// Error raised by a caller-supplied row projector.
    #[error(transparent)]
    Projection(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn conversion(value: impl std::fmt::Display, target: &'static str) -> Self {
        Error::Conversion {
            value: value.to_string(),
            target,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
