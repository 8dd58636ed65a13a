//! Error types for value conversion

use thiserror::Error;

/// Errors raised when reading typed data out of a `Value` or `Row`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("Column not found: {column}")]
    MissingColumn { column: String },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Value out of range for {target}: {value}")]
    OutOfRange { target: &'static str, value: String },

    #[error("Unexpected NULL in column {column}")]
    UnexpectedNull { column: String },

    /// The backend returned a column type `Value` has no decoding for.
    #[error("Unsupported column type: {type_name}")]
    UnsupportedType { type_name: String },
}

/// Result type alias for value conversions.
pub type ValueResult<T> = Result<T, ValueError>;
