//! Core type definitions for realmstore.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing per realm and never reused.
/// They identify lock owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// State of a transaction.
///
/// `Open → Committing → Closing → Closed` on success,
/// `Open → Committing → RollingBack → Closing → Failed` on a failed commit,
/// `Open → RollingBack → Closing → Closed` on rollback and
/// `Open → Closing → Closed` for read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Commands may be registered.
    Open,
    /// Commands are running.
    Committing,
    /// Applied commands are being undone.
    RollingBack,
    /// Locks are being released and notifications prepared.
    Closing,
    /// Closed normally.
    Closed,
    /// A commit failed; every applied command was undone.
    Failed,
}

impl TransactionState {
    /// Returns true once the transaction can no longer be used.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// What happens when a transaction is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseStrategy {
    /// Commands are not executed.
    #[default]
    ReadOnly,
    /// Commands are executed and changes published.
    Commit,
    /// Commands are discarded and flushed commands undone.
    Rollback,
}
