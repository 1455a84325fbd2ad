//! In-memory adapters for testing and transient use.

use crate::error::{StorageError, StorageResult};
use crate::port::{LogMessagePort, PersistencePort};
use parking_lot::RwLock;
use realmstore_model::{LogMessage, RootElement};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// An in-memory persistence port.
///
/// Elements are kept as `type -> id -> element`. Useful for:
/// - Unit and integration tests
/// - Restart round trips without touching the file system
///
/// # Thread Safety
///
/// This port is thread-safe and can be shared across threads.
#[derive(Debug)]
pub struct InMemoryPersistence<T> {
    data: RwLock<BTreeMap<String, BTreeMap<String, T>>>,
}

impl<T> Default for InMemoryPersistence<T> {
    fn default() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: RootElement> InMemoryPersistence<T> {
    /// Creates an empty port.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a port pre-filled with elements.
    ///
    /// Useful for testing preload.
    #[must_use]
    pub fn with_elements(elements: impl IntoIterator<Item = T>) -> Self {
        let port = Self::new();
        {
            let mut data = port.data.write();
            for e in elements {
                data.entry(e.type_name().to_string())
                    .or_default()
                    .insert(e.id().to_string(), e);
            }
        }
        port
    }

    /// Returns the total number of stored elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: RootElement> PersistencePort<T> for InMemoryPersistence<T> {
    fn query_types(&self) -> StorageResult<BTreeSet<String>> {
        Ok(self
            .data
            .read()
            .iter()
            .filter(|(_, by_id)| !by_id.is_empty())
            .map(|(t, _)| t.clone())
            .collect())
    }

    fn query_size(&self, type_name: Option<&str>) -> StorageResult<usize> {
        let data = self.data.read();
        Ok(match type_name {
            Some(t) => data.get(t).map_or(0, BTreeMap::len),
            None => data.values().map(BTreeMap::len).sum(),
        })
    }

    fn query_all(&self, type_name: &str) -> StorageResult<Vec<T>> {
        Ok(self
            .data
            .read()
            .get(type_name)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default())
    }

    fn query_by(&self, type_name: &str, id: &str) -> StorageResult<Option<T>> {
        Ok(self
            .data
            .read()
            .get(type_name)
            .and_then(|by_id| by_id.get(id))
            .cloned())
    }

    fn save(&self, element: &T) -> StorageResult<()> {
        self.data
            .write()
            .entry(element.type_name().to_string())
            .or_default()
            .insert(element.id().to_string(), element.clone());
        Ok(())
    }

    fn remove(&self, element: &T) -> StorageResult<()> {
        let mut data = self.data.write();
        let removed = data
            .get_mut(element.type_name())
            .and_then(|by_id| by_id.remove(element.id()));
        match removed {
            Some(_) => Ok(()),
            None => Err(StorageError::not_found(element.type_name(), element.id())),
        }
    }
}

/// An in-memory log message store.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    messages: RwLock<Vec<LogMessage>>,
}

impl InMemoryLogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing messages, oldest first.
    #[must_use]
    pub fn with_messages(messages: Vec<LogMessage>) -> Self {
        Self {
            messages: RwLock::new(messages),
        }
    }

    /// Returns a copy of every stored message.
    #[must_use]
    pub fn messages(&self) -> Vec<LogMessage> {
        self.messages.read().clone()
    }

    /// Returns the number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogMessagePort for InMemoryLogStore {
    fn query_latest(&self, realm: &str, limit: usize) -> StorageResult<Vec<LogMessage>> {
        let messages = self.messages.read();
        let of_realm: Vec<&LogMessage> = messages.iter().filter(|m| m.realm == realm).collect();
        let skip = of_realm.len().saturating_sub(limit);
        Ok(of_realm.into_iter().skip(skip).cloned().collect())
    }

    fn save(&self, message: &LogMessage) -> StorageResult<()> {
        let mut messages = self.messages.write();
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    fn remove_all(&self, to_remove: &[LogMessage]) -> StorageResult<()> {
        let ids: HashSet<_> = to_remove.iter().map(|m| m.id).collect();
        self.messages.write().retain(|m| !ids.contains(&m.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmstore_model::{Locator, LogSeverity, Resource};

    #[test]
    fn save_is_upsert() {
        let port = InMemoryPersistence::<Resource>::new();
        port.save(&Resource::new("A", "first", "Item")).unwrap();
        port.save(&Resource::new("A", "second", "Item")).unwrap();
        assert_eq!(port.len(), 1);
        assert_eq!(port.query_by("Item", "A").unwrap().unwrap().name, "second");
    }

    #[test]
    fn types_and_sizes() {
        let port = InMemoryPersistence::with_elements([
            Resource::new("A", "A", "Item"),
            Resource::new("B", "B", "Item"),
            Resource::new("c", "C", "Car"),
        ]);
        let types: Vec<_> = port.query_types().unwrap().into_iter().collect();
        assert_eq!(types, vec!["Car".to_string(), "Item".to_string()]);
        assert_eq!(port.query_size(None).unwrap(), 3);
        assert_eq!(port.query_size(Some("Item")).unwrap(), 2);
        assert_eq!(port.query_size(Some("Nope")).unwrap(), 0);
        assert_eq!(port.query_all("Item").unwrap().len(), 2);
    }

    #[test]
    fn remove_missing_is_error() {
        let port = InMemoryPersistence::<Resource>::new();
        let r = Resource::new("A", "A", "Item");
        assert!(matches!(
            port.remove(&r),
            Err(StorageError::NotFound { .. })
        ));
        port.save(&r).unwrap();
        port.remove(&r).unwrap();
        assert!(port.query_types().unwrap().is_empty());
    }

    #[test]
    fn log_store_latest_per_realm() {
        let store = InMemoryLogStore::new();
        let loc = Locator::parse("Resource/Item/A").unwrap();
        for i in 0..5 {
            let realm = if i % 2 == 0 { "r1" } else { "r2" };
            store
                .save(&LogMessage::new(realm, "u", loc.clone(), LogSeverity::Info, "k", format!("m{i}")))
                .unwrap();
        }
        let latest = store.query_latest("r1", 2).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].message, "m2");
        assert_eq!(latest[1].message, "m4");

        store.remove_all(&latest).unwrap();
        assert_eq!(store.len(), 3);
    }
}
