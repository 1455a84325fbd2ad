//! Realms: isolated namespaces of elements.

use crate::audit::AuditTrail;
use crate::command::RealmElement;
use crate::config::{DataStoreMode, RealmConfig};
use crate::element_map::ElementMap;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockTable;
use crate::observer::ObserverRegistry;
use crate::operations_log::OperationsLog;
use crate::privilege::{AllowAll, AuthorizationPort, Credential};
use crate::stats::RealmStats;
use crate::transaction::Transaction;
use crate::types::TransactionId;
use realmstore_model::{Activity, Order, Resource};
use realmstore_storage::{Persistence, PersistencePort};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Collaborators a realm is wired to at initialization.
#[derive(Clone)]
pub struct RealmContext {
    /// How long `lock()` waits for a busy locator.
    pub lock_timeout: Duration,
    /// Per-tag observer backlog above which a warning is logged.
    pub observer_queue_capacity: usize,
    /// Durable storage; required unless the realm is transient.
    pub persistence: Option<Persistence>,
    /// Operations log that committed log messages go to.
    pub operations_log: Option<Arc<OperationsLog>>,
    /// Authorization engine.
    pub authorization: Arc<dyn AuthorizationPort>,
}

impl Default for RealmContext {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            observer_queue_capacity: 1024,
            persistence: None,
            operations_log: None,
            authorization: Arc::new(AllowAll),
        }
    }
}

impl std::fmt::Debug for RealmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmContext")
            .field("lock_timeout", &self.lock_timeout)
            .field("observer_queue_capacity", &self.observer_queue_capacity)
            .field("persistence", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

/// A named, isolated set of elements with its own storage mode.
///
/// A realm owns one [`ElementMap`] per element kind, an [`AuditTrail`], a
/// [`LockTable`] and an [`ObserverRegistry`]. All access goes through
/// transactions opened with [`Realm::open_tx`].
pub struct Realm {
    config: RealmConfig,
    resources: ElementMap<Resource>,
    orders: ElementMap<Order>,
    activities: ElementMap<Activity>,
    audit_trail: AuditTrail,
    locks: LockTable,
    observers: ObserverRegistry,
    operations_log: Option<Arc<OperationsLog>>,
    authorization: Arc<dyn AuthorizationPort>,
    persistence: Option<Persistence>,
    stats: RealmStats,
    next_tx: AtomicU64,
    started: AtomicBool,
}

impl Realm {
    /// Wires a realm together. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns a config error if a cached or transactional realm has no
    /// persistence.
    pub fn initialize(config: RealmConfig, context: RealmContext) -> CoreResult<Self> {
        let mode = config.mode;
        let persistence = if mode.is_transient() {
            None
        } else {
            Some(context.persistence.ok_or_else(|| {
                CoreError::config(format!("realm {} is {mode:?} but has no persistence", config.name))
            })?)
        };

        let name = config.name.clone();
        Ok(Self {
            resources: ElementMap::new(&name, mode, persistence.as_ref().map(|p| Arc::clone(&p.resources)))?,
            orders: ElementMap::new(&name, mode, persistence.as_ref().map(|p| Arc::clone(&p.orders)))?,
            activities: ElementMap::new(&name, mode, persistence.as_ref().map(|p| Arc::clone(&p.activities)))?,
            audit_trail: AuditTrail::new(&name, config.audit_trail_enabled),
            locks: LockTable::new(context.lock_timeout),
            observers: ObserverRegistry::new(&name, context.observer_queue_capacity),
            operations_log: context.operations_log,
            authorization: context.authorization,
            persistence,
            stats: RealmStats::new(),
            next_tx: AtomicU64::new(1),
            started: AtomicBool::new(false),
            config,
        })
    }

    /// Creates and starts a transient realm with default collaborators.
    ///
    /// # Errors
    ///
    /// Never fails for a transient realm; the signature matches
    /// [`Realm::initialize`].
    pub fn transient(name: impl Into<String>) -> CoreResult<Self> {
        let realm = Self::initialize(
            RealmConfig::new(name, DataStoreMode::Transient),
            RealmContext::default(),
        )?;
        realm.start()?;
        Ok(realm)
    }

    /// Starts the realm. Cached realms preload every element, one read-only
    /// transaction per kind.
    ///
    /// A destroyed realm can be started again; observer delivery resumes
    /// for the existing subscriptions.
    ///
    /// # Errors
    ///
    /// Returns a storage error if preloading fails.
    pub fn start(&self) -> CoreResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.observers.reopen();
        if let (DataStoreMode::Cached, Some(persistence)) = (self.mode(), &self.persistence) {
            self.preload(persistence.resources.as_ref())?;
            self.preload(persistence.orders.as_ref())?;
            self.preload(persistence.activities.as_ref())?;
        }
        info!(realm = %self.name(), mode = ?self.mode(), "realm started");
        Ok(())
    }

    fn preload<T: RealmElement>(&self, port: &dyn PersistencePort<T>) -> CoreResult<()> {
        let tx = self.open_tx(Credential::system("agent"), format!("preload.{}", T::KIND));
        let map = T::map(self);
        let mut total = 0;
        let types = port.query_types()?;
        for type_name in &types {
            total += map.load(port.query_all(type_name)?);
        }
        tx.close()?;
        info!(realm = %self.name(), kind = %T::KIND, types = types.len(), elements = total, "preloaded");
        Ok(())
    }

    /// Releases in-memory state and stops observer delivery. Durable state
    /// is untouched.
    pub fn destroy(&self) {
        if !self.locks.is_empty() {
            warn!(realm = %self.name(), held = self.locks.len(), "destroying realm with held locks");
        }
        self.observers.shutdown();
        self.resources.clear();
        self.orders.clear();
        self.activities.clear();
        self.started.store(false, Ordering::Release);
        info!(realm = %self.name(), "realm destroyed");
    }

    /// Opens a transaction acting for `credential`.
    pub fn open_tx(&self, credential: Credential, action: impl Into<String>) -> Transaction<'_> {
        let id = TransactionId::new(self.next_tx.fetch_add(1, Ordering::Relaxed));
        self.stats.record_transaction_open();
        Transaction::new(self, id, credential, action.into())
    }

    /// Runs `work` in a transaction that commits if it returns `Ok` and rolls
    /// back if it returns `Err`.
    ///
    /// A transaction the closure set to roll back is rolled back either way.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or the commit's.
    pub fn transaction<R, F>(&self, credential: Credential, action: &str, work: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<R>,
    {
        let mut tx = self.open_tx(credential, action);
        match work(&mut tx) {
            Ok(value) => {
                if tx.close_strategy() != crate::types::CloseStrategy::Rollback {
                    tx.commit_on_close();
                }
                tx.close()?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback_on_close();
                if let Err(close_error) = tx.close() {
                    warn!(realm = %self.name(), error = %close_error, "rollback after failed work also failed");
                }
                Err(e)
            }
        }
    }

    /// Returns the realm name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the storage mode.
    #[must_use]
    pub fn mode(&self) -> DataStoreMode {
        self.config.mode
    }

    /// Returns the realm configuration.
    #[must_use]
    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    /// Returns true between [`start`](Self::start) and
    /// [`destroy`](Self::destroy).
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Returns the resource map.
    #[must_use]
    pub fn resources(&self) -> &ElementMap<Resource> {
        &self.resources
    }

    /// Returns the order map.
    #[must_use]
    pub fn orders(&self) -> &ElementMap<Order> {
        &self.orders
    }

    /// Returns the activity map.
    #[must_use]
    pub fn activities(&self) -> &ElementMap<Activity> {
        &self.activities
    }

    /// Returns the audit trail.
    #[must_use]
    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit_trail
    }

    /// Returns the lock table.
    #[must_use]
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Returns the observer registry.
    #[must_use]
    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Returns the operations log, if wired.
    #[must_use]
    pub fn operations_log(&self) -> Option<&Arc<OperationsLog>> {
        self.operations_log.as_ref()
    }

    /// Returns the authorization engine.
    #[must_use]
    pub fn authorization(&self) -> &dyn AuthorizationPort {
        self.authorization.as_ref()
    }

    /// Returns the counters.
    #[must_use]
    pub fn stats(&self) -> &RealmStats {
        &self.stats
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("name", &self.config.name)
            .field("mode", &self.config.mode)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmstore_storage::InMemoryPersistence;

    fn cached_context(resources: Arc<InMemoryPersistence<Resource>>) -> RealmContext {
        let mut persistence = Persistence::in_memory();
        persistence.resources = resources;
        RealmContext {
            persistence: Some(persistence),
            ..RealmContext::default()
        }
    }

    #[test]
    fn cached_realm_requires_persistence() {
        let err = Realm::initialize(
            RealmConfig::new("r", DataStoreMode::Cached),
            RealmContext::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn initialize_does_no_io_and_start_preloads() {
        let port = Arc::new(InMemoryPersistence::with_elements([
            Resource::new("A", "A", "Item"),
            Resource::new("B", "B", "Item"),
            Resource::new("m1", "M1", "Machine"),
        ]));
        let realm = Realm::initialize(
            RealmConfig::new("r", DataStoreMode::Cached),
            cached_context(port),
        )
        .unwrap();
        assert_eq!(realm.resources().size(None).unwrap(), 0);

        realm.start().unwrap();
        assert_eq!(realm.resources().size(None).unwrap(), 3);
        assert_eq!(realm.resources().size(Some("Machine")).unwrap(), 1);
        assert!(realm.is_started());
    }

    #[test]
    fn transactional_realm_does_not_preload() {
        let port = Arc::new(InMemoryPersistence::with_elements([Resource::new("A", "A", "Item")]));
        let realm = Realm::initialize(
            RealmConfig::new("r", DataStoreMode::Transactional),
            cached_context(port),
        )
        .unwrap();
        realm.start().unwrap();
        assert!(realm.resources().get("Item", "A").unwrap().is_some());
    }

    #[test]
    fn destroy_clears_memory_only() {
        let port = Arc::new(InMemoryPersistence::with_elements([Resource::new("A", "A", "Item")]));
        let realm = Realm::initialize(
            RealmConfig::new("r", DataStoreMode::Cached),
            cached_context(Arc::clone(&port)),
        )
        .unwrap();
        realm.start().unwrap();
        realm.destroy();
        assert_eq!(realm.resources().size(None).unwrap(), 0);
        assert_eq!(port.len(), 1);
        assert!(!realm.is_started());
    }

    #[test]
    fn restarted_realm_delivers_to_observers() {
        #[derive(Default)]
        struct Count(AtomicU64);
        impl crate::observer::Observer for Count {
            fn add(
                &self,
                _tag: &str,
                elements: &[realmstore_model::Element],
            ) -> Result<(), crate::observer::ObserverError> {
                self.0.fetch_add(elements.len() as u64, Ordering::Relaxed);
                Ok(())
            }
        }

        let realm = Realm::transient("r").unwrap();
        let count = Arc::new(Count::default());
        realm.observers().register("Resource", count.clone());
        realm.destroy();
        assert!(realm.observers().is_shut_down());

        realm.start().unwrap();
        realm
            .transaction(Credential::new("alice"), "after", |tx| {
                tx.add_resource(Resource::new("A", "A", "Item"))
            })
            .unwrap();
        realm.observers().drain();
        assert_eq!(count.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn transaction_ids_increase() {
        let realm = Realm::transient("r").unwrap();
        let a = realm.open_tx(Credential::new("alice"), "a").id();
        let b = realm.open_tx(Credential::new("alice"), "b").id();
        assert!(a < b);
        assert_eq!(realm.stats().transactions_opened(), 2);
    }
}
