//! Per-transaction lock set and read cache.

use crate::error::{CoreError, CoreResult};
use crate::realm::Realm;
use crate::types::TransactionId;
use realmstore_model::{Element, ElementKind, Locator, RootElement};
use std::collections::{HashMap, HashSet};

/// Locators locked by one transaction, released together on close.
#[derive(Debug, Default)]
pub(crate) struct LockSet {
    held: HashSet<Locator>,
}

impl LockSet {
    pub(crate) fn lock(
        &mut self,
        realm: &Realm,
        locator: &Locator,
        owner: TransactionId,
    ) -> CoreResult<()> {
        if self.held.contains(locator) {
            return Ok(());
        }
        if let Err(e) = realm.locks().acquire(locator, owner) {
            realm.stats().record_lock_timeout();
            return Err(e);
        }
        self.held.insert(locator.clone());
        Ok(())
    }

    /// Releases one locator early. Releasing an untracked locator is a
    /// no-op; a tracked locator the table does not attribute to `owner` is
    /// a lock error.
    pub(crate) fn release(
        &mut self,
        realm: &Realm,
        locator: &Locator,
        owner: TransactionId,
    ) -> CoreResult<bool> {
        if !self.held.remove(locator) {
            return Ok(false);
        }
        if realm.locks().release(locator, owner) {
            Ok(true)
        } else {
            Err(CoreError::lock(
                locator,
                format!("tracked by {owner} but not held in the lock table"),
            ))
        }
    }

    pub(crate) fn release_all(&mut self, realm: &Realm, owner: TransactionId) -> usize {
        if self.held.is_empty() {
            return 0;
        }
        let released = realm.locks().release_all(self.held.iter(), owner);
        self.held.clear();
        released
    }

    pub(crate) fn contains(&self, locator: &Locator) -> bool {
        self.held.contains(locator)
    }

    pub(crate) fn len(&self) -> usize {
        self.held.len()
    }
}

type Key = (ElementKind, String, String);

/// Elements read through a transactional realm, kept for the lifetime of
/// one transaction. Disabled for other modes, whose maps are already in
/// memory.
#[derive(Debug, Default)]
pub(crate) struct ReadCache {
    enabled: bool,
    entries: HashMap<Key, Element>,
}

impl ReadCache {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn get<T: RootElement>(&self, type_name: &str, id: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }
        self.entries
            .get(&(T::KIND, type_name.to_string(), id.to_string()))
            .cloned()
            .and_then(T::from_element)
    }

    pub(crate) fn put<T: RootElement>(&mut self, element: &T) {
        if self.enabled {
            self.entries.insert(
                (T::KIND, element.type_name().to_string(), element.id().to_string()),
                element.clone().into_element(),
            );
        }
    }

    pub(crate) fn forget<T: RootElement>(&mut self, type_name: &str, id: &str) {
        if self.enabled {
            self.entries
                .remove(&(T::KIND, type_name.to_string(), id.to_string()));
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
