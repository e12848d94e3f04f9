//! Per-object outcomes of a delete batch.

use crate::domain::ObjectRef;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status of one object touched by a delete batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The row and all its edges are gone
    Deleted,

    /// The object was left in place
    Retained(RetainReason),

    /// The acting principal may not delete the object
    Denied(DenyReason),

    /// The store failed while deleting the object
    Failed(Failure),
}

impl DeleteOutcome {
    /// Returns `true` for [`DeleteOutcome::Deleted`]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted)
    }

    /// Returns `true` if the object no longer exists after the batch.
    ///
    /// Objects that were already absent count as gone.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            DeleteOutcome::Deleted | DeleteOutcome::Retained(RetainReason::NotFound)
        )
    }

    /// Human-readable reason, empty for deleted objects.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            DeleteOutcome::Deleted => String::new(),
            DeleteOutcome::Retained(reason) => reason.to_string(),
            DeleteOutcome::Denied(reason) => reason.to_string(),
            DeleteOutcome::Failed(failure) => failure.to_string(),
        }
    }

    /// Error category of the outcome, `None` for deleted objects.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            DeleteOutcome::Deleted => None,
            DeleteOutcome::Retained(RetainReason::NotFound) => Some(ErrorKind::NotFound),
            DeleteOutcome::Retained(
                RetainReason::StillReferenced | RetainReason::OwnedByOtherUser,
            ) => Some(ErrorKind::ConstraintRetained),
            DeleteOutcome::Retained(
                RetainReason::DependencyFailed
                | RetainReason::BlockedByDescendant
                | RetainReason::Cancelled,
            ) => Some(ErrorKind::DependencyFailed),
            DeleteOutcome::Denied(_) => Some(ErrorKind::PermissionDenied),
            DeleteOutcome::Failed(failure) => Some(match failure.kind {
                FailureKind::LockTimeout => ErrorKind::LockTimeout,
                FailureKind::Storage | FailureKind::InvalidGraph => ErrorKind::StorageFailure,
            }),
        }
    }
}

/// Why an object was left in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetainReason {
    /// The object does not exist (already deleted or never created)
    NotFound,

    /// Referrers outside the deleted set still link to the object
    StillReferenced,

    /// Reached only through links held by objects of another owner
    OwnedByOtherUser,

    /// A prerequisite of this object was not deleted
    DependencyFailed,

    /// A contained child of this object will not be deleted
    BlockedByDescendant,

    /// The request was cancelled before this object's batch ran
    Cancelled,
}

impl fmt::Display for RetainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetainReason::NotFound => "not found",
            RetainReason::StillReferenced => "still referenced",
            RetainReason::OwnedByOtherUser => "owned by another user",
            RetainReason::DependencyFailed => "dependency failed",
            RetainReason::BlockedByDescendant => "blocked by descendant",
            RetainReason::Cancelled => "cancelled",
        })
    }
}

/// Why a principal may not delete an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The group's rule table forbids it
    PermissionDenied,

    /// Every path to the object runs through a denied ancestor
    BlockedByAncestor,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenyReason::PermissionDenied => "permission denied",
            DenyReason::BlockedByAncestor => "blocked by ancestor",
        })
    }
}

/// Category of a storage-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The transaction or a row operation failed
    Storage,

    /// Write locks could not be acquired within the configured wait
    LockTimeout,

    /// The store reported a containment cycle
    InvalidGraph,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Storage => "storage failure",
            FailureKind::LockTimeout => "lock timeout",
            FailureKind::InvalidGraph => "invalid graph",
        })
    }
}

/// A storage-side failure for one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Failure {
    /// Category of the failure
    pub kind: FailureKind,

    /// Message from the store
    pub message: String,
}

impl Failure {
    /// Create a new failure
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Storage failure with the given message
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Storage, message)
    }

    /// Storage failure of a batch sibling rolled back because of `culprit`
    #[must_use]
    pub fn rolled_back(culprit: ObjectRef) -> Self {
        Self::storage(format!("rolled back: {culprit} failed"))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
