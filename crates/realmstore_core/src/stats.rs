//! Realm statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let realm = agent.realm("defaultRealm")?;
//!
//! // Run transactions...
//!
//! let stats = realm.stats().snapshot();
//! println!("Committed: {}", stats.transactions_committed);
//! println!("Undone commands: {}", stats.commands_undone);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one realm.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct RealmStats {
    // Transaction counters
    transactions_opened: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    transactions_failed: AtomicU64,

    // Command counters
    commands_executed: AtomicU64,
    commands_undone: AtomicU64,

    // Element access
    elements_read: AtomicU64,

    lock_timeouts: AtomicU64,
}

impl RealmStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_open(&self) {
        self.transactions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_failure(&self) {
        self.transactions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_command_executed(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_command_undone(&self) {
        self.commands_undone.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.elements_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of transactions opened.
    #[must_use]
    pub fn transactions_opened(&self) -> u64 {
        self.transactions_opened.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    #[must_use]
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back.
    #[must_use]
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions whose commit failed.
    #[must_use]
    pub fn transactions_failed(&self) -> u64 {
        self.transactions_failed.load(Ordering::Relaxed)
    }

    /// Returns the number of commands executed.
    #[must_use]
    pub fn commands_executed(&self) -> u64 {
        self.commands_executed.load(Ordering::Relaxed)
    }

    /// Returns the number of commands undone.
    #[must_use]
    pub fn commands_undone(&self) -> u64 {
        self.commands_undone.load(Ordering::Relaxed)
    }

    /// Returns the number of element reads through transactions.
    #[must_use]
    pub fn elements_read(&self) -> u64 {
        self.elements_read.load(Ordering::Relaxed)
    }

    /// Returns the number of lock waits that timed out.
    #[must_use]
    pub fn lock_timeouts(&self) -> u64 {
        self.lock_timeouts.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_opened: self.transactions_opened(),
            transactions_committed: self.transactions_committed(),
            transactions_rolled_back: self.transactions_rolled_back(),
            transactions_failed: self.transactions_failed(),
            commands_executed: self.commands_executed(),
            commands_undone: self.commands_undone(),
            elements_read: self.elements_read(),
            lock_timeouts: self.lock_timeouts(),
        }
    }
}

/// A point-in-time copy of [`RealmStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Transactions opened.
    pub transactions_opened: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Transactions whose commit failed.
    pub transactions_failed: u64,
    /// Commands executed.
    pub commands_executed: u64,
    /// Commands undone.
    pub commands_undone: u64,
    /// Element reads.
    pub elements_read: u64,
    /// Lock waits that timed out.
    pub lock_timeouts: u64,
}
