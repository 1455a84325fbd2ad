//! User-facing log messages.

use crate::locator::Locator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Severity of a [`LogMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogSeverity {
    /// Informational.
    Info,
    /// Something a user should notice.
    Notification,
    /// Something went wrong but work continued.
    Warning,
    /// An operation failed.
    Error,
    /// An operation failed with an unexpected error.
    Exception,
}

/// A message kept by the operations log.
///
/// Messages are identified by `id`; equality and hashing only consider it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    /// Unique id.
    pub id: Uuid,
    /// Realm the message belongs to.
    pub realm: String,
    /// User that caused the message.
    pub username: String,
    /// Element or sub-element the message concerns.
    pub locator: Locator,
    /// Severity.
    pub severity: LogSeverity,
    /// Message key, for translation.
    pub key: String,
    /// Rendered message text.
    pub message: String,
    /// Values substituted into the message.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl LogMessage {
    /// Creates a message with a fresh id and the current time.
    pub fn new(
        realm: impl Into<String>,
        username: impl Into<String>,
        locator: Locator,
        severity: LogSeverity,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            realm: realm.into(),
            username: username.into(),
            locator,
            severity,
            key: key.into(),
            message: message.into(),
            values: BTreeMap::new(),
            timestamp_ms: crate::now_millis(),
        }
    }

    /// Adds a substitution value.
    #[must_use]
    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl PartialEq for LogMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LogMessage {}

impl Hash for LogMessage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> LogMessage {
        LogMessage::new(
            "defaultRealm",
            "alice",
            Locator::parse("Resource/Item/A").unwrap(),
            LogSeverity::Info,
            "item.created",
            "Item created",
        )
    }

    #[test]
    fn identity_is_the_id() {
        let a = msg();
        let mut b = a.clone();
        b.message = "changed".into();
        assert_eq!(a, b);
        assert_ne!(a, msg());
    }

    #[test]
    fn values_are_kept() {
        let m = msg().value("id", "A");
        assert_eq!(m.values.get("id").map(String::as_str), Some("A"));
    }
}
