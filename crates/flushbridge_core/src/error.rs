//! Error types for flushbridge core.

use crate::types::Handle;
use flushbridge_protocol::ProtocolError;
use thiserror::Error;

/// Result type for entity store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by an entity store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No metadata is registered for the entity type.
    #[error("unknown entity type: {entity_type}")]
    UnknownEntityType {
        /// The requested type name.
        entity_type: String,
    },

    /// The handle does not name a tracked entity.
    #[error("unknown handle: {handle}")]
    UnknownHandle {
        /// The stale or foreign handle.
        handle: Handle,
    },

    /// The entity is tracked but no longer managed (deleted or detached).
    #[error("entity {handle} is not managed")]
    NotManaged {
        /// The detached entity.
        handle: Handle,
    },

    /// A reference points at a row that does not exist.
    #[error("row not found: {entity_type} {identity}")]
    MissingRow {
        /// Entity type name.
        entity_type: String,
        /// Rendered identity.
        identity: String,
    },

    /// Schema metadata is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// The staged changes violate a constraint.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// The store cannot be reached.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity problem.
        message: String,
    },

    /// The pre-commit hook failed.
    #[error("pre-commit hook failed: {message}")]
    HookFailed {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an unknown entity type error.
    pub fn unknown_entity_type(entity_type: impl Into<String>) -> Self {
        Self::UnknownEntityType {
            entity_type: entity_type.into(),
        }
    }

    /// Creates a missing row error.
    pub fn missing_row(entity_type: impl Into<String>, identity: impl ToString) -> Self {
        Self::MissingRow {
            entity_type: entity_type.into(),
            identity: identity.to_string(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a hook failure error.
    pub fn hook_failed(message: impl Into<String>) -> Self {
        Self::HookFailed {
            message: message.into(),
        }
    }
}

/// Result type for flush operations.
pub type FlushResult<T> = Result<T, FlushError>;

/// Errors that abort a flush.
///
/// None of these produce a partial change-set: the whole invocation fails.
#[derive(Debug, Error)]
pub enum FlushError {
    /// An operation does not fit the schema (wrong association kind,
    /// unknown property, identifier write, mismatched target type).
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A detached reference matched no entity.
    #[error("entity not found: {entity_type} {identity}")]
    EntityNotFound {
        /// Entity type name.
        entity_type: String,
        /// Rendered identity or temporary uid that was looked up.
        identity: String,
    },

    /// The store's commit failed; nothing was written.
    #[error("commit failed: {0}")]
    StoreCommit(StoreError),

    /// A store call failed while staging changes.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An entity payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl FlushError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an entity not found error.
    pub fn entity_not_found(entity_type: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity_type: entity_type.into(),
            identity: identity.into(),
        }
    }

    /// Returns true if the error came from the store's commit.
    pub fn is_commit_failure(&self) -> bool {
        matches!(self, FlushError::StoreCommit(_))
    }
}
