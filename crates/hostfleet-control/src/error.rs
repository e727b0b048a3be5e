//! Error types for the control layer.
//!
//! Every error belongs to one [`ErrorKind`]. Validation, not-found and state
//! conflicts are detected before any mutation is written. Runner failures
//! never surface as a [`ControlError`]; they are recorded on the host and
//! returned as an [`OperationFailure`](crate::OperationFailure) of kind
//! [`ErrorKind::Gateway`].

use hostfleet_core::{AllocationId, Dimension, HostId};
use hostfleet_store::{HostState, StoreError};
use thiserror::Error;

use crate::lifecycle::Operation;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The request is malformed or collides with existing inventory.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested host was not found.
    #[error("host not found: {0}")]
    HostNotFound(HostId),

    /// The requested allocation was not found.
    #[error("allocation not found: {0}")]
    AllocationNotFound(AllocationId),

    /// The operation is not allowed in the host's current lifecycle state.
    #[error("cannot {operation} host {host_id} in state {state}: {reason}")]
    StateConflict {
        /// The host the operation targeted.
        host_id: HostId,
        /// The host's state when the operation was attempted.
        state: HostState,
        /// The rejected operation.
        operation: Operation,
        /// Why the operation was rejected.
        reason: String,
    },

    /// The host does not have enough free capacity.
    #[error(
        "insufficient {dimension} on host {host_id}: requested {requested}, available {available}"
    )]
    InsufficientCapacity {
        /// The host the allocation targeted.
        host_id: HostId,
        /// The first exhausted dimension.
        dimension: Dimension,
        /// Amount requested on that dimension.
        requested: u64,
        /// Amount available on that dimension.
        available: u64,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ControlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input or a uniqueness violation.
    Validation,
    /// A host or allocation does not exist.
    NotFound,
    /// The operation is invalid for the host's lifecycle state.
    StateConflict,
    /// Not enough free capacity.
    InsufficientCapacity,
    /// The provisioning runner failed.
    Gateway,
    /// Storage or internal failure.
    Internal,
}

impl ControlError {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::HostNotFound(_) | Self::AllocationNotFound(_) => ErrorKind::NotFound,
            Self::StateConflict { .. } => ErrorKind::StateConflict,
            Self::InsufficientCapacity { .. } => ErrorKind::InsufficientCapacity,
            Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Database(_)) | Self::Internal(_)
        )
    }
}

impl From<StoreError> for ControlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { index, value } => {
                Self::Validation(format!("{index} {value} is already registered"))
            }
            other => Self::Store(other),
        }
    }
}
