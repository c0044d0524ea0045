//! Service manager error types.

use lb_common::{IdAllocError, SyncMapError};
use lb_map::{BackendId, LbMapError, ServiceId};
use lb_types::L3n4Addr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// No free ID left in the allocator's range.
    #[error("{kind} ID space exhausted (max {max_id})")]
    IdExhausted { kind: &'static str, max_id: u16 },

    /// Writing or deleting a service record failed.
    #[error("Failed to sync service {id} to forwarding table: {source}")]
    ServiceSyncFailed { id: ServiceId, source: LbMapError },

    /// Writing or deleting a backend record failed.
    #[error("Failed to sync backend {id} to forwarding table: {source}")]
    BackendSyncFailed { id: BackendId, source: LbMapError },

    /// The forwarding table could not be dumped.
    #[error("Failed to read forwarding table: {0}")]
    TableReadFailed(LbMapError),

    #[error("Invalid frontend {0}: IP and port must be non-zero")]
    InvalidFrontend(L3n4Addr),

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    #[error("Reference count error: {0}")]
    RefCount(#[from] SyncMapError),
}

impl ServiceError {
    /// Returns true if repeating the call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::ServiceSyncFailed { source, .. }
            | ServiceError::BackendSyncFailed { source, .. }
            | ServiceError::TableReadFailed(source) => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<IdAllocError> for ServiceError {
    fn from(err: IdAllocError) -> Self {
        match err {
            IdAllocError::Exhausted { kind, max_id } => ServiceError::IdExhausted { kind, max_id },
            other => ServiceError::RestoreFailed(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_alloc_error() {
        let err: ServiceError = IdAllocError::Exhausted {
            kind: "Service",
            max_id: 10,
        }
        .into();
        assert_eq!(
            err,
            ServiceError::IdExhausted {
                kind: "Service",
                max_id: 10
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sync_error_retryable_follows_source() {
        let id = BackendId::from_raw(3).unwrap();
        let busy = ServiceError::BackendSyncFailed {
            id,
            source: LbMapError::Busy,
        };
        let invalid = ServiceError::BackendSyncFailed {
            id,
            source: LbMapError::invalid_parameter("bad address"),
        };
        assert!(busy.is_retryable());
        assert!(!invalid.is_retryable());
        assert_eq!(
            busy.to_string(),
            "Failed to sync backend 3 to forwarding table: Table busy"
        );
    }
}
