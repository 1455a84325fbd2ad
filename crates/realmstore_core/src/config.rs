//! Agent and realm configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// How a realm is backed by durable storage. Immutable after start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStoreMode {
    /// In memory only, nothing is persisted.
    #[default]
    Transient,
    /// Fully preloaded at start; the cache is authoritative for reads and
    /// every commit flushes through to storage.
    Cached,
    /// No preload; reads and writes go to storage per transaction.
    Transactional,
}

impl DataStoreMode {
    /// Returns true for [`DataStoreMode::Transient`].
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true for [`DataStoreMode::Cached`].
    #[must_use]
    pub const fn is_cached(self) -> bool {
        matches!(self, Self::Cached)
    }

    /// Returns true for [`DataStoreMode::Transactional`].
    #[must_use]
    pub const fn is_transactional(self) -> bool {
        matches!(self, Self::Transactional)
    }
}

/// Configuration of a single realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmConfig {
    /// Realm name.
    pub name: String,
    /// Storage mode.
    #[serde(default)]
    pub mode: DataStoreMode,
    /// Whether audits are recorded at all.
    #[serde(default = "default_true")]
    pub audit_trail_enabled: bool,
    /// Whether reads are audited too.
    #[serde(default)]
    pub audit_trail_for_read: bool,
}

fn default_true() -> bool {
    true
}

impl RealmConfig {
    /// Creates a realm configuration with audits enabled for writes.
    pub fn new(name: impl Into<String>, mode: DataStoreMode) -> Self {
        Self {
            name: name.into(),
            mode,
            audit_trail_enabled: true,
            audit_trail_for_read: false,
        }
    }

    /// Sets whether the audit trail is enabled.
    #[must_use]
    pub const fn audit_trail_enabled(mut self, value: bool) -> Self {
        self.audit_trail_enabled = value;
        self
    }

    /// Sets whether reads are audited.
    #[must_use]
    pub const fn audit_trail_for_read(mut self, value: bool) -> Self {
        self.audit_trail_for_read = value;
        self
    }
}

/// Configuration for an [`crate::Agent`] and its realms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum operations-log messages kept per realm.
    pub max_messages: usize,

    /// How long `lock()` waits for a busy locator, in milliseconds.
    pub lock_timeout_ms: u64,

    /// Per-tag observer backlog above which a warning is logged.
    pub observer_queue_capacity: usize,

    /// Realms to create.
    pub realms: Vec<RealmConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_messages: 10_000,
            lock_timeout_ms: 10_000,
            observer_queue_capacity: 1024,
            realms: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the operations-log bound.
    #[must_use]
    pub const fn max_messages(mut self, value: usize) -> Self {
        self.max_messages = value;
        self
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the observer backlog warning threshold.
    #[must_use]
    pub const fn observer_queue_capacity(mut self, value: usize) -> Self {
        self.observer_queue_capacity = value;
        self
    }

    /// Adds a realm.
    #[must_use]
    pub fn realm(mut self, realm: RealmConfig) -> Self {
        self.realms.push(realm);
        self
    }

    /// Returns the lock wait timeout.
    #[must_use]
    pub const fn lock_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns a config error for empty or duplicate realm names, a zero
    /// message bound or a zero queue capacity.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_messages == 0 {
            return Err(CoreError::config("max_messages must be greater than 0"));
        }
        if self.observer_queue_capacity == 0 {
            return Err(CoreError::config(
                "observer_queue_capacity must be greater than 0",
            ));
        }
        let mut seen = HashSet::new();
        for realm in &self.realms {
            if realm.name.trim().is_empty() {
                return Err(CoreError::config("realm name must not be empty"));
            }
            if !seen.insert(realm.name.as_str()) {
                return Err(CoreError::config(format!(
                    "realm {} is configured twice",
                    realm.name
                )));
            }
        }
        Ok(())
    }
}
