//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building or parsing model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A locator string could not be parsed.
    #[error("invalid locator '{input}': {reason}")]
    InvalidLocator {
        /// The offending input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An element kind tag was not recognised.
    #[error("unknown element kind: {0}")]
    UnknownKind(String),
}

impl ModelError {
    /// Creates an invalid locator error.
    pub fn invalid_locator(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocator {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
