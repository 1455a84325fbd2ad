//! The agent: owner of every realm and of the shared operations log.
//!
//! # Lifecycle
//!
//! ```rust,ignore
//! let agent = Agent::builder(config)
//!     .persistence("defaultRealm", Persistence::open_dir("data")?)
//!     .build()?;
//! agent.start()?;
//!
//! let realm = agent.realm("defaultRealm")?;
//! realm.transaction(Credential::new("alice"), "create", |tx| {
//!     tx.add_resource(Resource::new("A", "A", "Item"))
//! })?;
//!
//! agent.shutdown();
//! ```

use crate::config::AgentConfig;
use crate::error::{CoreError, CoreResult};
use crate::operations_log::OperationsLog;
use crate::privilege::{AllowAll, AuthorizationPort};
use crate::realm::{Realm, RealmContext};
use realmstore_storage::{LogMessagePort, Persistence};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Collects the collaborators of an [`Agent`].
#[must_use]
pub struct AgentBuilder {
    config: AgentConfig,
    persistence: HashMap<String, Persistence>,
    log_port: Option<Arc<dyn LogMessagePort>>,
    authorization: Arc<dyn AuthorizationPort>,
}

impl AgentBuilder {
    /// Starts from `config`, allowing everything and persisting nothing.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            persistence: HashMap::new(),
            log_port: None,
            authorization: Arc::new(AllowAll),
        }
    }

    /// Sets the storage of one realm.
    pub fn persistence(mut self, realm: impl Into<String>, persistence: Persistence) -> Self {
        self.persistence.insert(realm.into(), persistence);
        self
    }

    /// Sets where operations-log messages are persisted.
    pub fn log_port(mut self, port: Arc<dyn LogMessagePort>) -> Self {
        self.log_port = Some(port);
        self
    }

    /// Sets the authorization engine shared by all realms.
    pub fn authorization(mut self, authorization: Arc<dyn AuthorizationPort>) -> Self {
        self.authorization = authorization;
        self
    }

    /// Validates the configuration and wires every realm. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns a config error if the configuration is invalid, a
    /// non-transient realm has no persistence, or persistence was given for
    /// an unknown realm.
    pub fn build(mut self) -> CoreResult<Agent> {
        self.config.validate()?;
        if let Some(unknown) = self
            .persistence
            .keys()
            .find(|name| !self.config.realms.iter().any(|r| &r.name == *name))
        {
            return Err(CoreError::config(format!(
                "persistence given for unknown realm {unknown}"
            )));
        }

        let operations_log = Arc::new(OperationsLog::new(
            self.config.max_messages,
            self.log_port.take(),
        ));

        let mut realms = BTreeMap::new();
        for realm_config in &self.config.realms {
            let context = RealmContext {
                lock_timeout: self.config.lock_timeout_duration(),
                observer_queue_capacity: self.config.observer_queue_capacity,
                persistence: self.persistence.remove(&realm_config.name),
                operations_log: Some(Arc::clone(&operations_log)),
                authorization: Arc::clone(&self.authorization),
            };
            let realm = Realm::initialize(realm_config.clone(), context)?;
            realms.insert(realm_config.name.clone(), realm);
        }

        Ok(Agent {
            config: self.config,
            realms,
            operations_log,
            started: AtomicBool::new(false),
        })
    }
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("config", &self.config)
            .field("persistence", &self.persistence.keys().collect::<Vec<_>>())
            .field("log_port", &self.log_port.is_some())
            .finish_non_exhaustive()
    }
}

/// Container of realms.
pub struct Agent {
    config: AgentConfig,
    realms: BTreeMap<String, Realm>,
    operations_log: Arc<OperationsLog>,
    started: AtomicBool,
}

impl Agent {
    /// Returns a builder for an agent with `config`.
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// Starts every realm and loads the operations log of the persisted
    /// ones. Starting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if preloading fails.
    pub fn start(&self) -> CoreResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for realm in self.realms.values() {
            realm.start()?;
        }
        self.operations_log
            .start(self.realms.values().map(|r| (r.name(), r.mode())))?;
        info!(realms = self.realms.len(), "agent started");
        Ok(())
    }

    /// Returns the realm called `name`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if there is no such realm.
    pub fn realm(&self, name: &str) -> CoreResult<&Realm> {
        self.realms
            .get(name)
            .ok_or_else(|| CoreError::not_found(format!("realm {name} does not exist")))
    }

    /// Returns the realm names in sorted order.
    pub fn realm_names(&self) -> impl Iterator<Item = &str> {
        self.realms.keys().map(String::as_str)
    }

    /// Returns the operations log shared by all realms.
    #[must_use]
    pub fn operations_log(&self) -> &Arc<OperationsLog> {
        &self.operations_log
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Returns true between [`start`](Self::start) and
    /// [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Waits for queued observer events and operations-log writes, then
    /// destroys every realm.
    pub fn shutdown(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        for realm in self.realms.values() {
            realm.observers().drain();
        }
        self.operations_log.drain();
        for realm in self.realms.values() {
            realm.destroy();
        }
        self.operations_log.shutdown();
        info!("agent stopped");
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("realms", &self.realms.keys().collect::<Vec<_>>())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataStoreMode, RealmConfig};
    use crate::privilege::Credential;
    use realmstore_model::{Locator, LogMessage, LogSeverity, Resource};
    use realmstore_storage::{InMemoryLogStore, InMemoryPersistence};

    fn config() -> AgentConfig {
        AgentConfig::new()
            .max_messages(10)
            .realm(RealmConfig::new("defaultRealm", DataStoreMode::Cached))
            .realm(RealmConfig::new("scratch", DataStoreMode::Transient))
    }

    #[test]
    fn build_requires_persistence_for_cached_realms() {
        let err = Agent::builder(config()).build().unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn build_rejects_persistence_for_unknown_realm() {
        let err = Agent::builder(config())
            .persistence("defaultRealm", Persistence::in_memory())
            .persistence("other", Persistence::in_memory())
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn start_preloads_and_loads_operations_log() {
        let mut persistence = Persistence::in_memory();
        persistence.resources = Arc::new(InMemoryPersistence::with_elements([Resource::new(
            "A", "A", "Item",
        )]));
        let locator = Locator::parse("Resource/Item/A").unwrap();
        let store = Arc::new(InMemoryLogStore::with_messages(vec![
            LogMessage::new("defaultRealm", "bob", locator.clone(), LogSeverity::Info, "k", "m"),
            LogMessage::new("scratch", "bob", locator.clone(), LogSeverity::Info, "k", "m"),
        ]));

        let agent = Agent::builder(config())
            .persistence("defaultRealm", persistence)
            .log_port(store)
            .build()
            .unwrap();
        assert_eq!(agent.realm("defaultRealm").unwrap().resources().size(None).unwrap(), 0);

        agent.start().unwrap();
        let realm = agent.realm("defaultRealm").unwrap();
        assert!(realm.resources().contains("Item", "A").unwrap());
        assert_eq!(agent.operations_log().get_messages("defaultRealm").len(), 1);
        assert!(agent.operations_log().get_messages("scratch").is_empty());
        assert_eq!(
            agent.realm_names().collect::<Vec<_>>(),
            vec!["defaultRealm", "scratch"]
        );
    }

    #[test]
    fn unknown_realm_is_not_found() {
        let agent = Agent::builder(AgentConfig::new()).build().unwrap();
        assert!(matches!(
            agent.realm("nope").unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }

    #[test]
    fn shutdown_destroys_realms() {
        let agent = Agent::builder(
            AgentConfig::new().realm(RealmConfig::new("scratch", DataStoreMode::Transient)),
        )
        .build()
        .unwrap();
        agent.start().unwrap();
        let realm = agent.realm("scratch").unwrap();
        realm
            .transaction(Credential::new("alice"), "create", |tx| {
                tx.add_resource(Resource::new("A", "A", "Item"))
            })
            .unwrap();

        agent.shutdown();
        assert!(!agent.is_started());
        assert!(!agent.realm("scratch").unwrap().is_started());
        assert_eq!(agent.realm("scratch").unwrap().resources().size(None).unwrap(), 0);
    }
}
