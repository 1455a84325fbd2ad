//! Error types for the realmstore engine.

use realmstore_model::{Locator, ModelError, Operation};
use realmstore_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A precondition failed before anything was changed.
    Validation,
    /// A command failed while applying its effect.
    Execution,
    /// A locator could not be locked or unlocked.
    Lock,
    /// The credential lacks a privilege.
    AccessDenied,
    /// A demanded element, template or locator does not exist.
    NotFound,
    /// The API was used in the wrong transaction state.
    InvalidOperation,
    /// Configuration is invalid.
    Config,
    /// A persistence port failed.
    Storage,
}

impl ErrorKind {
    /// Returns true if the error is safe to show to the caller as is.
    #[must_use]
    pub const fn is_user_facing(self) -> bool {
        matches!(self, Self::Validation | Self::NotFound | Self::AccessDenied)
    }
}

/// Errors that can occur in realmstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A command precondition failed; nothing was changed.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the failed precondition.
        message: String,
    },

    /// A command failed while applying its effect.
    #[error("execution failed: {message}")]
    Execution {
        /// Description of the failure.
        message: String,
    },

    /// Locking failed.
    #[error("lock error on {locator}: {message}")]
    Lock {
        /// The locator involved.
        locator: Locator,
        /// Description of the failure.
        message: String,
    },

    /// The credential lacks the privilege for an operation.
    #[error("access denied: user {username} may not {operation} {locator}")]
    AccessDenied {
        /// The user that was denied.
        username: String,
        /// The denied operation.
        operation: Operation,
        /// The element the operation targeted.
        locator: Locator,
    },

    /// A demanded element does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was not found.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// Persistence port error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Model value error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl CoreError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::Model(_) => ErrorKind::Validation,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Lock { .. } => ErrorKind::Lock,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            Self::Config { .. } => ErrorKind::Config,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Creates a lock error.
    pub fn lock(locator: &Locator, message: impl Into<String>) -> Self {
        Self::Lock {
            locator: locator.clone(),
            message: message.into(),
        }
    }

    /// Creates an access-denied error.
    pub fn access_denied(username: impl Into<String>, operation: Operation, locator: Locator) -> Self {
        Self::AccessDenied {
            username: username.into(),
            operation,
            locator,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
