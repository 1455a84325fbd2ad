//! Per-kind element maps.

use crate::config::DataStoreMode;
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use realmstore_model::RootElement;
use realmstore_storage::{PersistencePort, StorageError};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type ById<T> = HashMap<String, T>;

/// The elements of one kind within one realm, keyed by `(type, id)`.
///
/// Behaviour depends on the realm's [`DataStoreMode`]:
///
/// - **Transient**: memory only.
/// - **Cached**: memory is authoritative for reads. Every mutation is
///   flushed to the persistence port first and applied to memory only if
///   the flush succeeded, so cache and store never diverge. The map's write
///   lock is not held during the flush; readers keep seeing the previous
///   value until it completes.
/// - **Transactional**: nothing is kept in memory. Reads and writes go to
///   the port. Per-transaction memoization lives in the transaction.
///
/// The map does not lock locators. Callers must hold the element's lock
/// before mutating it; the check-flush-apply sequence relies on it.
pub struct ElementMap<T: RootElement> {
    realm: String,
    mode: DataStoreMode,
    elements: RwLock<HashMap<String, ById<T>>>,
    port: Option<Arc<dyn PersistencePort<T>>>,
}

impl<T: RootElement> ElementMap<T> {
    /// Creates an empty map.
    ///
    /// Transient maps ignore `port`.
    ///
    /// # Errors
    ///
    /// Returns a config error if a cached or transactional map has no port.
    pub fn new(
        realm: impl Into<String>,
        mode: DataStoreMode,
        port: Option<Arc<dyn PersistencePort<T>>>,
    ) -> CoreResult<Self> {
        let realm = realm.into();
        let port = if mode.is_transient() { None } else { port };
        if !mode.is_transient() && port.is_none() {
            return Err(CoreError::config(format!(
                "realm {realm} is {mode:?} but has no {} persistence",
                T::KIND
            )));
        }
        Ok(Self {
            realm,
            mode,
            elements: RwLock::new(HashMap::new()),
            port,
        })
    }

    /// Returns the realm this map belongs to.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Returns the storage mode.
    #[must_use]
    pub fn mode(&self) -> DataStoreMode {
        self.mode
    }

    fn port(&self) -> CoreResult<&Arc<dyn PersistencePort<T>>> {
        self.port.as_ref().ok_or_else(|| {
            CoreError::config(format!("realm {} has no {} persistence", self.realm, T::KIND))
        })
    }

    /// Returns a copy of an element.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a transactional read fails.
    pub fn get(&self, type_name: &str, id: &str) -> CoreResult<Option<T>> {
        if self.mode.is_transactional() {
            return Ok(self.port()?.query_by(type_name, id)?);
        }
        Ok(self
            .elements
            .read()
            .get(type_name)
            .and_then(|by_id| by_id.get(id))
            .cloned())
    }

    /// Returns true if an element exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a transactional read fails.
    pub fn contains(&self, type_name: &str, id: &str) -> CoreResult<bool> {
        if self.mode.is_transactional() {
            return Ok(self.port()?.query_by(type_name, id)?.is_some());
        }
        Ok(self
            .elements
            .read()
            .get(type_name)
            .is_some_and(|by_id| by_id.contains_key(id)))
    }

    /// Returns copies of every element of a type, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a transactional read fails.
    pub fn get_all(&self, type_name: &str) -> CoreResult<Vec<T>> {
        if self.mode.is_transactional() {
            return Ok(self.port()?.query_all(type_name)?);
        }
        let mut all: Vec<T> = self
            .elements
            .read()
            .get(type_name)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(all)
    }

    /// Returns every type with at least one element.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a transactional read fails.
    pub fn types(&self) -> CoreResult<BTreeSet<String>> {
        if self.mode.is_transactional() {
            return Ok(self.port()?.query_types()?);
        }
        Ok(self
            .elements
            .read()
            .iter()
            .filter(|(_, by_id)| !by_id.is_empty())
            .map(|(t, _)| t.clone())
            .collect())
    }

    /// Counts elements of one type or of all types.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a transactional read fails.
    pub fn size(&self, type_name: Option<&str>) -> CoreResult<usize> {
        if self.mode.is_transactional() {
            return Ok(self.port()?.query_size(type_name)?);
        }
        let elements = self.elements.read();
        Ok(match type_name {
            Some(t) => elements.get(t).map_or(0, HashMap::len),
            None => elements.values().map(HashMap::len).sum(),
        })
    }

    /// Inserts a new element.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `(type, id)` already exists, or a
    /// storage error if the flush fails (the map is left unchanged).
    pub fn insert(&self, element: &T) -> CoreResult<()> {
        if self.mode.is_transactional() {
            let port = self.port()?;
            if port.query_by(element.type_name(), element.id())?.is_some() {
                return Err(self.already_exists(element));
            }
            port.save(element)?;
            return Ok(());
        }

        if self.cached(element).is_some() {
            return Err(self.already_exists(element));
        }
        if let Some(port) = &self.port {
            port.save(element)?;
        }
        self.put(element.clone());
        debug!(realm = %self.realm, locator = %element.locator(), "element inserted");
        Ok(())
    }

    /// Replaces an existing element and returns the previous value.
    ///
    /// The element's version is set to the previous version plus one.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the element does not exist, or a
    /// storage error if the flush fails (the map is left unchanged).
    pub fn update(&self, element: &mut T) -> CoreResult<T> {
        if self.mode.is_transactional() {
            let port = self.port()?;
            let previous = port
                .query_by(element.type_name(), element.id())?
                .ok_or_else(|| self.missing(element))?;
            element.set_version(previous.version() + 1);
            port.save(element)?;
            return Ok(previous);
        }

        let previous = self.cached(element).ok_or_else(|| self.missing(element))?;
        element.set_version(previous.version() + 1);
        if let Some(port) = &self.port {
            port.save(element)?;
        }
        self.put(element.clone());
        debug!(realm = %self.realm, locator = %element.locator(), version = element.version(), "element updated");
        Ok(previous)
    }

    /// Removes an existing element and returns it.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the element does not exist, or a
    /// storage error if the flush fails (the map is left unchanged).
    pub fn remove(&self, element: &T) -> CoreResult<T> {
        if self.mode.is_transactional() {
            let port = self.port()?;
            let removed = port
                .query_by(element.type_name(), element.id())?
                .ok_or_else(|| self.missing(element))?;
            port.remove(&removed)?;
            return Ok(removed);
        }

        let removed = self.cached(element).ok_or_else(|| self.missing(element))?;
        if let Some(port) = &self.port {
            port.remove(&removed)?;
        }
        if let Some(by_id) = self.elements.write().get_mut(element.type_name()) {
            by_id.remove(element.id());
        }
        debug!(realm = %self.realm, locator = %element.locator(), "element removed");
        Ok(removed)
    }

    fn cached(&self, element: &T) -> Option<T> {
        self.elements
            .read()
            .get(element.type_name())
            .and_then(|by_id| by_id.get(element.id()))
            .cloned()
    }

    fn put(&self, element: T) {
        self.elements
            .write()
            .entry(element.type_name().to_string())
            .or_default()
            .insert(element.id().to_string(), element);
    }

    /// Bulk preload: puts elements into memory without existence checks and
    /// without flushing. Only meaningful for cached maps.
    pub fn load(&self, loaded: impl IntoIterator<Item = T>) -> usize {
        let mut elements = self.elements.write();
        let mut count = 0;
        for element in loaded {
            elements
                .entry(element.type_name().to_string())
                .or_default()
                .insert(element.id().to_string(), element);
            count += 1;
        }
        count
    }

    /// Puts an element back, replacing whatever is stored. Used by undo.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn restore(&self, element: &T) -> CoreResult<()> {
        if !self.mode.is_transactional() {
            self.put(element.clone());
        }
        if let Some(port) = &self.port {
            port.save(element)?;
        }
        Ok(())
    }

    /// Drops an element if present. Used by undo.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn discard(&self, element: &T) -> CoreResult<()> {
        if !self.mode.is_transactional() {
            if let Some(by_id) = self.elements.write().get_mut(element.type_name()) {
                by_id.remove(element.id());
            }
        }
        if let Some(port) = &self.port {
            match port.remove(element) {
                Ok(()) | Err(StorageError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Empties the in-memory map. Durable state is untouched.
    pub fn clear(&self) {
        self.elements.write().clear();
    }

    fn already_exists(&self, element: &T) -> CoreError {
        CoreError::validation(format!(
            "{} {} already exists in realm {}",
            T::KIND,
            element.locator(),
            self.realm
        ))
    }

    fn missing(&self, element: &T) -> CoreError {
        CoreError::not_found(format!(
            "{} {} does not exist in realm {}",
            T::KIND,
            element.locator(),
            self.realm
        ))
    }
}

impl<T: RootElement> fmt::Debug for ElementMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementMap")
            .field("kind", &T::KIND)
            .field("realm", &self.realm)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
