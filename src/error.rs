use arrow::error::ArrowError;
use thiserror::Error;

/// Coarse classification of a [`CleanError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Format,
    Range,
    Internal,
}

/// Errors raised by the cleaning transform. Any of them aborts the whole operation.
#[derive(Debug, Error)]
pub enum CleanError {
    /// A required column is absent from the table.
    #[error("schema error: required column `{column}` is missing")]
    Schema { column: String },

    /// A value could not be coerced to the type its column needs.
    #[error("format error: column `{column}` row {row}: cannot interpret {value:?} as {expected}")]
    Format {
        column: String,
        row: usize,
        value: String,
        expected: &'static str,
    },

    /// A column has a type that cannot be coerced at all.
    #[error("format error: column `{column}` has type {data_type}, expected {expected}")]
    ColumnType {
        column: String,
        data_type: String,
        expected: &'static str,
    },

    #[error("range error: {0}")]
    Range(String),

    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

impl CleanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CleanError::Schema { .. } => ErrorKind::Schema,
            CleanError::Format { .. } | CleanError::ColumnType { .. } => ErrorKind::Format,
            CleanError::Range(_) => ErrorKind::Range,
            CleanError::Arrow(_) => ErrorKind::Internal,
        }
    }
}
