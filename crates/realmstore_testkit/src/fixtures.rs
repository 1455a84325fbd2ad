//! Test fixtures and agent helpers.
//!
//! Provides ready-made agents, element builders and recording doubles for
//! observers, commands and the log message port.

use parking_lot::Mutex;
use realmstore_core::{
    Agent, AgentConfig, Command, CommandContext, CoreError, CoreResult, Credential, DataStoreMode,
    Observer, ObserverError, Realm, RealmConfig,
};
use realmstore_model::{
    Activity, Element, ElementKind, Locator, LogMessage, LogSeverity, Order, Parameter,
    ParameterBag, ParameterValue, Resource,
};
use realmstore_storage::{InMemoryLogStore, LogMessagePort, Persistence, StorageResult};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Name of the realm every [`TestAgent`] creates.
pub const TEST_REALM: &str = "defaultRealm";

/// A started agent with one realm and automatic cleanup.
pub struct TestAgent {
    /// The agent instance.
    pub agent: Agent,
    /// Log port shared by the agent's operations log.
    pub log_port: Arc<RecordingLogPort>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestAgent {
    /// Creates an agent with a transient realm.
    pub fn transient() -> Self {
        Self::with_config(base_config(DataStoreMode::Transient), None, None)
    }

    /// Creates an agent with a cached realm backed by in-memory ports.
    pub fn cached() -> Self {
        Self::with_config(
            base_config(DataStoreMode::Cached),
            Some(Persistence::in_memory()),
            None,
        )
    }

    /// Creates an agent with a cached realm backed by JSON files in a fresh
    /// temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let persistence =
            Persistence::open_dir(temp_dir.path()).expect("Failed to open file persistence");
        Self::with_config(
            base_config(DataStoreMode::Cached),
            Some(persistence),
            Some(temp_dir),
        )
    }

    /// Creates an agent from `config` whose first realm gets `persistence`.
    pub fn with_config(
        config: AgentConfig,
        persistence: Option<Persistence>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        Self::assemble(config, persistence, temp_dir, Arc::new(RecordingLogPort::new()))
    }

    fn assemble(
        config: AgentConfig,
        persistence: Option<Persistence>,
        temp_dir: Option<TempDir>,
        log_port: Arc<RecordingLogPort>,
    ) -> Self {
        let mut builder = Agent::builder(config.clone()).log_port(log_port.clone());
        if let (Some(persistence), Some(realm)) = (persistence, config.realms.first()) {
            builder = builder.persistence(realm.name.clone(), persistence);
        }
        let agent = builder.build().expect("Failed to build agent");
        agent.start().expect("Failed to start agent");
        Self {
            agent,
            log_port,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the test realm.
    pub fn realm(&self) -> &Realm {
        self.agent.realm(TEST_REALM).expect("Test realm is missing")
    }

    /// Returns the data directory if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Shuts the agent down and opens a new one on the same directory and
    /// log port.
    ///
    /// # Panics
    ///
    /// Panics if the agent is not file-backed.
    pub fn restart(self) -> Self {
        let Self {
            agent,
            log_port,
            _temp_dir: temp_dir,
        } = self;
        let config = agent.config().clone();
        agent.shutdown();
        drop(agent);

        let temp_dir = temp_dir.expect("Only file-backed agents can restart");
        let persistence =
            Persistence::open_dir(temp_dir.path()).expect("Failed to reopen file persistence");
        Self::assemble(config, Some(persistence), Some(temp_dir), log_port)
    }
}

impl std::ops::Deref for TestAgent {
    type Target = Agent;

    fn deref(&self) -> &Self::Target {
        &self.agent
    }
}

fn base_config(mode: DataStoreMode) -> AgentConfig {
    AgentConfig::new()
        .max_messages(100)
        .lock_timeout(Duration::from_millis(500))
        .realm(RealmConfig::new(TEST_REALM, mode))
}

/// Runs a test with a started transient agent.
pub fn with_transient_agent<F, R>(f: F) -> R
where
    F: FnOnce(&TestAgent) -> R,
{
    let agent = TestAgent::transient();
    f(&agent)
}

// ============================================================================
// Element builders
// ============================================================================

/// The default test user.
pub fn alice() -> Credential {
    Credential::new("alice")
}

/// A resource of type `Item`.
pub fn item(id: &str) -> Resource {
    Resource::new(id, format!("Item {id}"), "Item")
}

/// A resource with one `params` bag holding a string and an integer.
pub fn machine(id: &str, color: &str, capacity: i64) -> Resource {
    Resource::new(id, format!("Machine {id}"), "Machine").with_bag(
        ParameterBag::new("params", "Parameters", "Parameters")
            .with(Parameter::new(
                "color",
                "Color",
                ParameterValue::String(color.to_string()),
            ))
            .with(Parameter::new(
                "capacity",
                "Capacity",
                ParameterValue::Integer(capacity),
            )),
    )
}

/// An order of type `Sale`.
pub fn sale(id: &str) -> Order {
    Order::new(id, format!("Sale {id}"), "Sale")
}

/// An activity of type `Plan`.
pub fn plan(id: &str) -> Activity {
    Activity::new(id, format!("Plan {id}"), "Plan")
}

/// An info message on `locator`.
pub fn info_message(realm: &str, locator: &Locator, key: &str) -> LogMessage {
    LogMessage::new(realm, "alice", locator.clone(), LogSeverity::Info, key, key)
}

// ============================================================================
// Recording observer
// ============================================================================

/// One delivered batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// `add`, `update` or `remove`.
    pub operation: &'static str,
    /// The kind tag.
    pub tag: String,
    /// Ids in the batch.
    pub ids: Vec<String>,
}

/// An observer that records every batch, optionally sleeping first.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    deliveries: Mutex<Vec<Delivery>>,
    delay: Option<Duration>,
}

impl RecordingObserver {
    /// Creates an observer that records immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates an observer that sleeps `delay` before recording each batch.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    /// Returns every delivery so far.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Returns the ids delivered for `operation`, in delivery order.
    pub fn ids(&self, operation: &str) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.operation == operation)
            .flat_map(|d| d.ids.iter().cloned())
            .collect()
    }

    fn record(&self, operation: &'static str, tag: &str, elements: &[Element]) {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.deliveries.lock().push(Delivery {
            operation,
            tag: tag.to_string(),
            ids: elements.iter().map(|e| e.id().to_string()).collect(),
        });
    }
}

impl Observer for RecordingObserver {
    fn add(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        self.record("add", tag, elements);
        Ok(())
    }

    fn update(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        self.record("update", tag, elements);
        Ok(())
    }

    fn remove(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        self.record("remove", tag, elements);
        Ok(())
    }
}

/// An observer that fails every notification.
#[derive(Debug, Default)]
pub struct FailingObserver;

impl Observer for FailingObserver {
    fn add(&self, tag: &str, _elements: &[Element]) -> Result<(), ObserverError> {
        Err(format!("cannot handle {tag}").into())
    }

    fn update(&self, _tag: &str, _elements: &[Element]) -> Result<(), ObserverError> {
        panic!("observer panicked");
    }
}

// ============================================================================
// Journaled commands
// ============================================================================

/// Shared record of `do`/`undo` calls.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Creates an empty journal.
pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// A command that locks a locator of its own and appends `do:<name>` and
/// `undo:<name>` to a journal. Optionally fails in `validate` or
/// `do_command`.
#[derive(Debug)]
pub struct JournalCommand {
    name: String,
    locator: Locator,
    journal: Journal,
    fail_validate: bool,
    fail_do: bool,
}

impl JournalCommand {
    /// Creates a command that succeeds.
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        let name = name.into();
        Self {
            locator: Locator::for_element(ElementKind::Resource, "Journal", &name),
            name,
            journal: Arc::clone(journal),
            fail_validate: false,
            fail_do: false,
        }
    }

    /// Makes `do_command` fail with an execution error.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_do = true;
        self
    }

    /// Makes `validate` fail with a validation error.
    #[must_use]
    pub fn invalid(mut self) -> Self {
        self.fail_validate = true;
        self
    }
}

impl Command for JournalCommand {
    fn describe(&self) -> String {
        format!("journal {}", self.name)
    }

    fn locator(&self) -> Locator {
        self.locator.clone()
    }

    fn validate(&self, _ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        if self.fail_validate {
            return Err(CoreError::validation(format!("{} is invalid", self.name)));
        }
        Ok(())
    }

    fn do_command(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        ctx.lock(&self.locator)?;
        if self.fail_do {
            return Err(CoreError::execution(format!("{} failed", self.name)));
        }
        self.journal.lock().push(format!("do:{}", self.name));
        Ok(())
    }

    fn undo(&mut self, _ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        self.journal.lock().push(format!("undo:{}", self.name));
        Ok(())
    }
}

// ============================================================================
// Recording log port
// ============================================================================

/// A log message port over [`InMemoryLogStore`] that also records every
/// message it was asked to remove.
#[derive(Debug, Default)]
pub struct RecordingLogPort {
    store: InMemoryLogStore,
    removed: Mutex<Vec<LogMessage>>,
}

impl RecordingLogPort {
    /// Creates an empty port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a port with stored messages, oldest first.
    pub fn with_messages(messages: Vec<LogMessage>) -> Self {
        Self {
            store: InMemoryLogStore::with_messages(messages),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Returns the stored messages.
    pub fn stored(&self) -> Vec<LogMessage> {
        self.store.messages()
    }

    /// Returns every message removal was requested for.
    pub fn removed(&self) -> Vec<LogMessage> {
        self.removed.lock().clone()
    }
}

impl LogMessagePort for RecordingLogPort {
    fn query_latest(&self, realm: &str, limit: usize) -> StorageResult<Vec<LogMessage>> {
        self.store.query_latest(realm, limit)
    }

    fn save(&self, message: &LogMessage) -> StorageResult<()> {
        self.store.save(message)
    }

    fn remove_all(&self, messages: &[LogMessage]) -> StorageResult<()> {
        self.removed.lock().extend(messages.iter().cloned());
        self.store.remove_all(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_agent_has_the_test_realm() {
        with_transient_agent(|agent| {
            assert_eq!(agent.realm().name(), TEST_REALM);
            assert!(agent.realm().is_started());
        });
    }

    #[test]
    fn journal_command_records_calls() {
        let agent = TestAgent::transient();
        let journal = journal();
        let mut tx = agent.realm().open_tx(alice(), "journal");
        tx.add_command(JournalCommand::new("a", &journal)).unwrap();
        tx.commit().unwrap();
        assert_eq!(*journal.lock(), vec!["do:a".to_string()]);
    }

    #[test]
    fn machine_builder_sets_parameters() {
        let m = machine("m1", "red", 3);
        use realmstore_model::RootElement;
        assert_eq!(
            m.parameter("params", "color").and_then(|p| p.value.as_str()),
            Some("red")
        );
    }
}
