//! Persistence port traits.

use crate::error::StorageResult;
use crate::memory::InMemoryPersistence;
use realmstore_model::{Activity, LogMessage, Order, Resource, RootElement};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Durable storage for one element kind.
///
/// Ports are shared between the element map, the realm preload and any
/// number of transactions, so every method takes `&self` and implementors
/// handle their own synchronisation.
///
/// # Invariants
///
/// - `save` is an upsert keyed by `(type, id)`
/// - after `save(e)` returns, `query_by(e.type, e.id)` returns `e`
/// - `remove` of an absent element is an error
pub trait PersistencePort<T: RootElement>: Send + Sync {
    /// Returns every type that has at least one element.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn query_types(&self) -> StorageResult<BTreeSet<String>>;

    /// Counts elements, of one type or of all types.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn query_size(&self, type_name: Option<&str>) -> StorageResult<usize>;

    /// Returns every element of a type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn query_all(&self, type_name: &str) -> StorageResult<Vec<T>>;

    /// Returns one element.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn query_by(&self, type_name: &str, id: &str) -> StorageResult<Option<T>>;

    /// Inserts or replaces an element.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save(&self, element: &T) -> StorageResult<()>;

    /// Removes an element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element does not exist or the write fails.
    fn remove(&self, element: &T) -> StorageResult<()>;
}

/// Durable storage for operations-log messages.
pub trait LogMessagePort: Send + Sync {
    /// Returns at most `limit` of the newest messages of a realm, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn query_latest(&self, realm: &str, limit: usize) -> StorageResult<Vec<LogMessage>>;

    /// Stores a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save(&self, message: &LogMessage) -> StorageResult<()>;

    /// Removes messages. Unknown messages are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove_all(&self, messages: &[LogMessage]) -> StorageResult<()>;
}

/// The persistence ports of one realm, one per element kind.
#[derive(Clone)]
pub struct Persistence {
    /// Resource storage.
    pub resources: Arc<dyn PersistencePort<Resource>>,
    /// Order storage.
    pub orders: Arc<dyn PersistencePort<Order>>,
    /// Activity storage.
    pub activities: Arc<dyn PersistencePort<Activity>>,
}

impl Persistence {
    /// Creates a bundle from three ports.
    pub fn new(
        resources: Arc<dyn PersistencePort<Resource>>,
        orders: Arc<dyn PersistencePort<Order>>,
        activities: Arc<dyn PersistencePort<Activity>>,
    ) -> Self {
        Self {
            resources,
            orders,
            activities,
        }
    }

    /// Creates a bundle of fresh in-memory ports.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryPersistence::new()),
            Arc::new(InMemoryPersistence::new()),
            Arc::new(InMemoryPersistence::new()),
        )
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").finish_non_exhaustive()
    }
}

