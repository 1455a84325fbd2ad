//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The element to remove does not exist in the store.
    #[error("element {type_name}/{id} not found in store")]
    NotFound {
        /// Element type.
        type_name: String,
        /// Element id.
        id: String,
    },

    /// The store rejected the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}
