//! Forwarding table error types.
//!
//! Table writes are per-key operations against a kernel or hardware
//! table. Failures are reported as errno-style codes by the backing
//! implementation and converted here into [`LbMapError`].

use thiserror::Error;

/// Table operation kinds, used to label errors and to target injected
/// failures in the test double.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LbMapOp {
    UpsertBackend,
    DeleteBackend,
    UpsertService,
    DeleteService,
    Dump,
}

impl std::fmt::Display for LbMapOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LbMapOp::UpsertBackend => "upsert_backend",
            LbMapOp::DeleteBackend => "delete_backend",
            LbMapOp::UpsertService => "upsert_service",
            LbMapOp::DeleteService => "delete_service",
            LbMapOp::Dump => "dump",
        };
        write!(f, "{}", s)
    }
}

/// Error type for forwarding table operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LbMapError {
    /// The table has no room for another entry.
    #[error("Table full: {table}")]
    TableFull { table: String },

    /// The key does not exist in the table.
    #[error("Entry not found: {item}")]
    NotFound { item: String },

    /// The value was rejected by the table.
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The table is temporarily unable to serve the request.
    #[error("Table busy")]
    Busy,

    /// The table could not allocate memory for the entry.
    #[error("Out of memory")]
    NoMemory,

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LbMapError {
    pub fn table_full(table: impl Into<String>) -> Self {
        LbMapError::TableFull {
            table: table.into(),
        }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        LbMapError::NotFound { item: item.into() }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        LbMapError::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LbMapError::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the key was already absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LbMapError::NotFound { .. })
    }

    /// Returns true if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LbMapError::Busy | LbMapError::NoMemory | LbMapError::TableFull { .. }
        )
    }
}

/// Result type for forwarding table operations.
pub type LbMapResult<T> = Result<T, LbMapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(LbMapError::Busy.is_retryable());
        assert!(LbMapError::table_full("backends").is_retryable());
        assert!(!LbMapError::not_found("backend 1").is_retryable());
        assert!(!LbMapError::invalid_parameter("bad").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = LbMapError::table_full("lb4_backends");
        assert_eq!(err.to_string(), "Table full: lb4_backends");
    }

    #[test]
    fn test_op_display() {
        assert_eq!(LbMapOp::UpsertService.to_string(), "upsert_service");
    }
}
