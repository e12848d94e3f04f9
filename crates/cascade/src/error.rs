//! Error types for the delete engine.
//!
//! Errors come in two layers:
//!
//! - **`Error`**: the whole call is rejected before any processing (empty
//!   request list, unknown acting principal, bad configuration)
//! - **`StoreError`**: a graph store or permission lookup failed; the engine
//!   converts these into per-object outcomes and never aborts a batch for them
//!
//! Every per-object outcome maps onto one [`ErrorKind`], so callers can group
//! results without parsing reason strings.

use crate::domain::{GroupId, ObjectRef, PrincipalId};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for store and permission lookups.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors that reject a delete call atomically.
#[derive(Debug, Error)]
pub enum Error {
    /// The batch contained no requests
    #[error("delete batch is empty")]
    EmptyRequest,

    /// The acting principal is not known to the permission model
    #[error("unknown acting principal: {0}")]
    UnknownPrincipal(PrincipalId),

    /// A request in the batch is malformed
    #[error("invalid delete request: {0}")]
    InvalidRequest(String),

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The permission model could not be consulted
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures reported by a graph store or permission model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The object does not exist
    #[error("object not found: {0}")]
    NotFound(ObjectRef),

    /// Write locks could not be acquired in time
    #[error("lock on {object} not acquired within {waited:?}")]
    LockTimeout {
        /// First object that could not be locked
        object: ObjectRef,
        /// How long the transaction waited
        waited: Duration,
    },

    /// An edge is not allowed between these objects
    #[error("invalid edge {from} -> {to}: {reason}")]
    InvalidEdge {
        /// Edge source
        from: ObjectRef,
        /// Edge target
        to: ObjectRef,
        /// Why the edge was rejected
        reason: String,
    },

    /// Adding the edge would close a cycle
    #[error("edge {from} -> {to} would close a cycle")]
    Cycle {
        /// Edge source
        from: ObjectRef,
        /// Edge target
        to: ObjectRef,
    },

    /// The group has no permission record
    #[error("unknown group: {0}")]
    UnknownGroup(GroupId),

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

/// Error taxonomy of per-object outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested object absent; non-fatal
    NotFound,

    /// Authorization rule failed
    PermissionDenied,

    /// Still referenced elsewhere and not forced
    ConstraintRetained,

    /// A prerequisite was not deleted, so this object was not attempted
    DependencyFailed,

    /// Underlying transaction error
    StorageFailure,

    /// Exclusive access not acquired within the configured wait
    LockTimeout,
}

impl ErrorKind {
    /// Returns `true` if retrying the same request later may succeed
    /// without any change by the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageFailure | Self::LockTimeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::ConstraintRetained => write!(f, "constraint retained"),
            Self::DependencyFailed => write!(f, "dependency failed"),
            Self::StorageFailure => write!(f, "storage failure"),
            Self::LockTimeout => write!(f, "lock timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::LockTimeout.is_transient());
        assert!(ErrorKind::StorageFailure.is_transient());
        assert!(!ErrorKind::PermissionDenied.is_transient());
        assert!(!ErrorKind::NotFound.is_transient());
    }

    #[test]
    fn lock_timeout_display_names_object() {
        let error = StoreError::LockTimeout {
            object: ObjectRef::image(3),
            waited: Duration::from_millis(50),
        };
        assert!(error.to_string().contains("Image:3"));
    }
}
