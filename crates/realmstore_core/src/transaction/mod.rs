//! Transactions: the unit of work against a realm.
//!
//! A transaction collects [`Command`]s and runs them when it is closed with
//! the commit strategy:
//!
//! - **Atomicity**: if any command fails, every command already applied is
//!   undone in reverse order and the transaction ends `Failed`
//! - **Isolation**: mutated elements are locked per locator until close
//! - **Notification**: the net changes are published to the realm's
//!   observers off the committing thread
//!
//! Locks are released on every path out of a transaction, including drop.

mod read;
mod scope;
mod write;

pub use read::FoundElement;
pub(crate) use scope::{LockSet, ReadCache};

use crate::change_set::ChangeSet;
use crate::command::{Command, CommandContext};
use crate::error::{CoreError, CoreResult};
use crate::privilege::{Credential, ElementDescriptor};
use crate::realm::Realm;
use crate::types::{CloseStrategy, TransactionId, TransactionState};
use realmstore_model::{Audit, ElementKind, Locator, LogMessage, LogSeverity, Operation};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type PendingKey = (ElementKind, String, String);

/// Outcome of closing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    /// Transaction id.
    pub id: TransactionId,
    /// Realm name.
    pub realm: String,
    /// Action label.
    pub action: String,
    /// Final state.
    pub state: TransactionState,
    /// Strategy the transaction was closed with.
    pub strategy: CloseStrategy,
    /// Commands executed, including flushed ones.
    pub commands: usize,
    /// Elements with a net change.
    pub changes: usize,
    /// Time from open to close.
    pub duration: Duration,
}

/// A unit of work against one [`Realm`].
///
/// Opened with [`Realm::open_tx`]; closed by [`close`](Self::close), which
/// consumes it. The close strategy defaults to read-only.
pub struct Transaction<'r> {
    realm: &'r Realm,
    id: TransactionId,
    credential: Credential,
    action: String,
    state: TransactionState,
    close_strategy: CloseStrategy,
    pending: Vec<Box<dyn Command>>,
    executed: Vec<Box<dyn Command>>,
    commands_run: usize,
    locks: LockSet,
    changes: ChangeSet,
    cache: ReadCache,
    pending_adds: HashSet<PendingKey>,
    pending_removes: HashSet<PendingKey>,
    read_audits: Vec<Audit>,
    log_messages: Vec<LogMessage>,
    suppress_updates: bool,
    suppress_audits: bool,
    suppress_audits_for_audits: bool,
    started: Instant,
}

struct Failure {
    error: CoreError,
    locator: Locator,
}

impl<'r> Transaction<'r> {
    pub(crate) fn new(
        realm: &'r Realm,
        id: TransactionId,
        credential: Credential,
        action: String,
    ) -> Self {
        debug!(realm = %realm.name(), tx = %id, %action, user = %credential, "transaction opened");
        Self {
            realm,
            id,
            credential,
            action,
            state: TransactionState::Open,
            close_strategy: CloseStrategy::ReadOnly,
            pending: Vec::new(),
            executed: Vec::new(),
            commands_run: 0,
            locks: LockSet::default(),
            changes: ChangeSet::new(),
            cache: ReadCache::new(realm.mode().is_transactional()),
            pending_adds: HashSet::new(),
            pending_removes: HashSet::new(),
            read_audits: Vec::new(),
            log_messages: Vec::new(),
            suppress_updates: false,
            suppress_audits: false,
            suppress_audits_for_audits: false,
            started: Instant::now(),
        }
    }

    /// Returns the transaction id, which is also its lock owner id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the realm.
    #[must_use]
    pub fn realm(&self) -> &'r Realm {
        self.realm
    }

    /// Returns the credential the transaction acts for.
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Returns the action label.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while commands may be added.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Returns the locator of the transaction itself.
    #[must_use]
    pub fn locator(&self) -> Locator {
        Locator::for_transaction(self.realm.name(), &self.action)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "transaction {} is {:?}",
                self.id, self.state
            )))
        }
    }

    // === Close strategy ===

    /// Returns the close strategy.
    #[must_use]
    pub fn close_strategy(&self) -> CloseStrategy {
        self.close_strategy
    }

    /// Runs the commands on close.
    pub fn commit_on_close(&mut self) {
        self.close_strategy = CloseStrategy::Commit;
    }

    /// Discards the commands on close and undoes flushed ones.
    pub fn rollback_on_close(&mut self) {
        self.close_strategy = CloseStrategy::Rollback;
    }

    /// Closes without running commands.
    pub fn do_nothing_on_close(&mut self) {
        self.close_strategy = CloseStrategy::ReadOnly;
    }

    /// Marks the transaction for rollback and returns an execution error to
    /// propagate.
    pub fn fail(&mut self, message: impl Into<String>) -> CoreError {
        self.rollback_on_close();
        CoreError::execution(message)
    }

    // === Suppression flags ===

    /// Skips the observer event on commit.
    pub fn set_suppress_updates(&mut self, value: bool) {
        self.suppress_updates = value;
    }

    /// Returns true if the observer event is skipped.
    #[must_use]
    pub fn is_suppress_updates(&self) -> bool {
        self.suppress_updates
    }

    /// Skips recording audits on close.
    pub fn set_suppress_audits(&mut self, value: bool) {
        self.suppress_audits = value;
    }

    /// Returns true if audits are skipped.
    #[must_use]
    pub fn is_suppress_audits(&self) -> bool {
        self.suppress_audits
    }

    /// Skips auditing reads of the audit trail itself.
    pub fn set_suppress_audits_for_audits(&mut self, value: bool) {
        self.suppress_audits_for_audits = value;
    }

    /// Returns true if audit-trail reads are not audited.
    #[must_use]
    pub fn is_suppress_audits_for_audits(&self) -> bool {
        self.suppress_audits_for_audits
    }

    // === Commands ===

    /// Appends a command. Commands run in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an invalid-operation error unless the transaction is open.
    pub fn add_command<C: Command + 'static>(&mut self, command: C) -> CoreResult<()> {
        self.ensure_open()?;
        self.pending.push(Box::new(command));
        Ok(())
    }

    /// Returns true if commands were added or flushed.
    #[must_use]
    pub fn needs_commit(&self) -> bool {
        !self.pending.is_empty() || !self.executed.is_empty()
    }

    /// Returns the number of commands not yet executed.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    /// Checks a privilege of this transaction's credential.
    ///
    /// # Errors
    ///
    /// Returns an access-denied error if it is missing.
    pub fn assert_has_privilege(
        &self,
        operation: Operation,
        element: &ElementDescriptor,
    ) -> CoreResult<()> {
        self.realm
            .authorization()
            .assert_has_privilege(&self.credential, operation, element)
    }

    // === Locking ===

    /// Locks `locator` until the transaction closes.
    ///
    /// # Errors
    ///
    /// Returns a lock error if the locator stays busy past the realm's lock
    /// timeout, or invalid-operation if the transaction is closed.
    pub fn lock(&mut self, locator: &Locator) -> CoreResult<()> {
        if self.state.is_terminal() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is closed",
                self.id
            )));
        }
        self.locks.lock(self.realm, locator, self.id)
    }

    /// Releases one lock before close so other transactions can proceed.
    ///
    /// Releasing a locator this transaction does not hold is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a lock error if the locator is tracked by this transaction
    /// but the lock table attributes it to someone else.
    pub fn release_lock(&mut self, locator: &Locator) -> CoreResult<()> {
        self.locks.release(self.realm, locator, self.id).map(|_| ())
    }

    /// Returns true if this transaction holds the lock on `locator`.
    #[must_use]
    pub fn holds_lock(&self, locator: &Locator) -> bool {
        self.locks.contains(locator)
    }

    fn release_all_locks(&mut self) {
        let released = self.locks.release_all(self.realm, self.id);
        if released > 0 {
            debug!(tx = %self.id, released, "transaction locks released");
        }
    }

    // === Operations log ===

    /// Queues a message for the operations log, published on commit.
    pub fn add_log_message(&mut self, message: LogMessage) {
        self.log_messages.push(message);
    }

    // === Execution ===

    fn context(&mut self) -> CommandContext<'_> {
        CommandContext {
            realm: self.realm,
            tx: self.id,
            credential: &self.credential,
            locks: &mut self.locks,
            changes: &mut self.changes,
            cache: &mut self.cache,
        }
    }

    fn execute(&mut self, command: &mut dyn Command) -> CoreResult<()> {
        if let Some((operation, element)) = command.privilege() {
            self.assert_has_privilege(operation, &element)?;
        }
        let mut ctx = self.context();
        command.validate(&mut ctx)?;
        command.do_command(&mut ctx)?;
        self.realm.stats().record_command_executed();
        Ok(())
    }

    /// Runs pending commands. On failure the executed list includes the
    /// commands before the failing one, which itself is dropped.
    fn run_pending(&mut self) -> Result<(), Failure> {
        let batch = std::mem::take(&mut self.pending);
        let mut done: Vec<Box<dyn Command>> = Vec::with_capacity(batch.len());
        for mut command in batch {
            debug!(tx = %self.id, command = %command.describe(), "executing command");
            if let Err(error) = self.execute(command.as_mut()) {
                error!(tx = %self.id, command = %command.describe(), %error, "command failed");
                self.executed.append(&mut done);
                return Err(Failure {
                    error,
                    locator: command.locator(),
                });
            }
            self.commands_run += 1;
            done.push(command);
        }
        self.executed.append(&mut done);
        Ok(())
    }

    fn undo_executed(&mut self) {
        let mut executed = std::mem::take(&mut self.executed);
        while let Some(mut command) = executed.pop() {
            let describe = command.describe();
            let outcome = command.undo(&mut self.context());
            match outcome {
                Ok(()) => debug!(tx = %self.id, command = %describe, "command undone"),
                Err(e) => error!(tx = %self.id, command = %describe, error = %e, "undo failed"),
            }
            self.realm.stats().record_command_undone();
        }
        self.cache.clear();
    }

    /// Undoes everything, releases locks and reports the failure.
    fn abort(&mut self, failure: Failure) -> CoreError {
        self.state = TransactionState::RollingBack;
        self.pending.clear();
        self.undo_executed();
        self.changes.clear();
        self.state = TransactionState::Closing;
        self.release_all_locks();

        if let Some(log) = self.realm.operations_log() {
            let message = LogMessage::new(
                self.realm.name(),
                &self.credential.username,
                self.locator(),
                LogSeverity::Error,
                "transaction.failed",
                format!("Transaction {} failed: {}", self.action, failure.error),
            )
            .value("action", &self.action)
            .value("locator", failure.locator.to_string())
            .value("reason", failure.error.to_string());
            log.add_message(message);
        }
        self.log_messages.clear();

        self.state = TransactionState::Failed;
        self.realm.stats().record_transaction_failure();
        error!(realm = %self.realm.name(), tx = %self.id, action = %self.action, error = %failure.error, "transaction failed");
        failure.error
    }

    /// Executes the commands added so far. They stay undoable: if a later
    /// command fails, flushed commands are undone too.
    ///
    /// # Errors
    ///
    /// Returns the first command error; the transaction is then `Failed`.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        match self.run_pending() {
            Ok(()) => {
                self.pending_adds.clear();
                self.pending_removes.clear();
                Ok(())
            }
            Err(failure) => Err(self.abort(failure)),
        }
    }

    // === Close ===

    /// Closes the transaction with its close strategy.
    ///
    /// Closing a transaction whose flush already failed returns its result
    /// without doing anything further.
    ///
    /// # Errors
    ///
    /// With the commit strategy, returns the first command error after
    /// every applied command was undone.
    pub fn close(mut self) -> CoreResult<TransactionResult> {
        if self.state.is_terminal() {
            return Ok(self.result());
        }
        match self.close_strategy {
            CloseStrategy::Commit => self.close_commit()?,
            CloseStrategy::Rollback => self.close_rollback(),
            CloseStrategy::ReadOnly => self.close_read_only(),
        }
        Ok(self.result())
    }

    /// Shorthand for [`commit_on_close`](Self::commit_on_close) and
    /// [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// See [`close`](Self::close).
    pub fn commit(mut self) -> CoreResult<TransactionResult> {
        self.commit_on_close();
        self.close()
    }

    /// Shorthand for [`rollback_on_close`](Self::rollback_on_close) and
    /// [`close`](Self::close).
    pub fn rollback(mut self) -> TransactionResult {
        self.rollback_on_close();
        if !self.state.is_terminal() {
            self.close_rollback();
        }
        self.result()
    }

    fn close_commit(&mut self) -> CoreResult<()> {
        self.state = TransactionState::Committing;
        if let Err(failure) = self.run_pending() {
            return Err(self.abort(failure));
        }

        self.state = TransactionState::Closing;
        self.release_all_locks();

        if !self.suppress_updates {
            self.realm.observers().notify(self.changes.to_event());
        }
        if !self.suppress_audits {
            let audits = self.changes.to_audits(
                self.realm.name(),
                &self.credential.username,
                &self.action,
            );
            self.realm.audit_trail().add_all(audits);
            self.realm
                .audit_trail()
                .add_all(std::mem::take(&mut self.read_audits));
        }
        if let Some(log) = self.realm.operations_log() {
            for message in self.log_messages.drain(..) {
                log.add_message(message);
            }
        }

        self.state = TransactionState::Closed;
        self.realm.stats().record_transaction_commit();
        debug!(
            realm = %self.realm.name(),
            tx = %self.id,
            action = %self.action,
            changes = self.changes.len(),
            took_ms = self.started.elapsed().as_millis() as u64,
            "transaction committed"
        );
        Ok(())
    }

    fn close_rollback(&mut self) {
        self.state = TransactionState::RollingBack;
        self.pending.clear();
        self.undo_executed();
        self.changes.clear();
        self.state = TransactionState::Closing;
        self.release_all_locks();
        self.log_messages.clear();
        self.state = TransactionState::Closed;
        self.realm.stats().record_transaction_rollback();
        debug!(realm = %self.realm.name(), tx = %self.id, "transaction rolled back");
    }

    fn close_read_only(&mut self) {
        if !self.pending.is_empty() {
            warn!(tx = %self.id, action = %self.action, commands = self.pending.len(), "read-only transaction discards its commands");
            self.pending.clear();
        }
        if !self.executed.is_empty() {
            warn!(tx = %self.id, action = %self.action, commands = self.executed.len(), "read-only transaction undoes flushed commands");
            self.state = TransactionState::RollingBack;
            self.undo_executed();
            self.changes.clear();
        }
        self.state = TransactionState::Closing;
        self.release_all_locks();
        if !self.suppress_audits {
            self.realm
                .audit_trail()
                .add_all(std::mem::take(&mut self.read_audits));
        }
        self.log_messages.clear();
        self.state = TransactionState::Closed;
    }

    fn result(&self) -> TransactionResult {
        TransactionResult {
            id: self.id,
            realm: self.realm.name().to_string(),
            action: self.action.clone(),
            state: self.state,
            strategy: self.close_strategy,
            commands: self.commands_run,
            changes: self.changes.len(),
            duration: self.started.elapsed(),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if !self.pending.is_empty() || !self.executed.is_empty() {
            warn!(
                realm = %self.realm.name(),
                tx = %self.id,
                action = %self.action,
                pending = self.pending.len(),
                flushed = self.executed.len(),
                "transaction dropped without close"
            );
        }
        self.pending.clear();
        self.undo_executed();
        self.release_all_locks();
        self.state = TransactionState::Closed;
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("realm", &self.realm.name())
            .field("action", &self.action)
            .field("state", &self.state)
            .field("close_strategy", &self.close_strategy)
            .field("pending", &self.pending.len())
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataStoreMode, RealmConfig};
    use crate::observer::{Observer, ObserverError};
    use crate::operations_log::OperationsLog;
    use crate::privilege::PrivilegeTable;
    use crate::realm::RealmContext;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use realmstore_model::{
        AccessType, Action, Activity, Element, Order, Parameter, ParameterBag, ParameterValue,
        Resource, RootElement, INTERPRETATION_RESOURCE_REF, TEMPLATE,
    };
    use realmstore_storage::{InMemoryPersistence, PersistencePort, Persistence};
    use std::sync::Arc;

    fn alice() -> Credential {
        Credential::new("alice")
    }

    fn item(id: &str) -> Resource {
        Resource::new(id, id, "Item")
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Observer for Recorder {
        fn add(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
            let mut seen = self.seen.lock();
            seen.extend(elements.iter().map(|e| format!("add:{tag}:{}", e.id())));
            Ok(())
        }

        fn update(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
            let mut seen = self.seen.lock();
            seen.extend(elements.iter().map(|e| format!("update:{tag}:{}", e.id())));
            Ok(())
        }

        fn remove(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
            let mut seen = self.seen.lock();
            seen.extend(elements.iter().map(|e| format!("remove:{tag}:{}", e.id())));
            Ok(())
        }
    }

    /// Locks its locator, appends to a shared journal and optionally fails.
    struct Journaled {
        name: String,
        locator: Locator,
        fail: bool,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Journaled {
        fn new(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                locator: Locator::for_element(ElementKind::Resource, "Journal", name),
                fail: false,
                journal: Arc::clone(journal),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Command for Journaled {
        fn describe(&self) -> String {
            format!("journal {}", self.name)
        }

        fn locator(&self) -> Locator {
            self.locator.clone()
        }

        fn validate(&self, _ctx: &mut CommandContext<'_>) -> CoreResult<()> {
            Ok(())
        }

        fn do_command(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
            ctx.lock(&self.locator)?;
            if self.fail {
                return Err(CoreError::execution(format!("{} refused", self.name)));
            }
            self.journal.lock().push(format!("do:{}", self.name));
            Ok(())
        }

        fn undo(&mut self, _ctx: &mut CommandContext<'_>) -> CoreResult<()> {
            self.journal.lock().push(format!("undo:{}", self.name));
            Ok(())
        }
    }

    fn realm_with_log() -> (Realm, Arc<OperationsLog>) {
        let log = Arc::new(OperationsLog::new(100, None));
        let realm = Realm::initialize(
            RealmConfig::new("r", DataStoreMode::Transient),
            RealmContext {
                operations_log: Some(Arc::clone(&log)),
                ..RealmContext::default()
            },
        )
        .unwrap();
        realm.start().unwrap();
        (realm, log)
    }

    #[test]
    fn commit_applies_and_notifies() {
        let realm = Realm::transient("r").unwrap();
        let recorder = Arc::new(Recorder::default());
        realm.observers().register("Resource", recorder.clone());

        let mut tx = realm.open_tx(alice(), "create");
        tx.add_resource(item("A")).unwrap();
        tx.add_order(Order::new("o1", "O1", "Sale")).unwrap();
        let result = tx.commit().unwrap();

        assert_eq!(result.state, TransactionState::Closed);
        assert_eq!(result.commands, 2);
        assert_eq!(result.changes, 2);
        assert!(realm.resources().contains("Item", "A").unwrap());
        assert!(realm.locks().is_empty());

        realm.observers().drain();
        assert_eq!(*recorder.seen.lock(), vec!["add:Resource:A".to_string()]);
        assert_eq!(realm.audit_trail().count(AccessType::Create), 2);
    }

    #[test]
    fn duplicate_add_is_rejected_eagerly() {
        let realm = Realm::transient("r").unwrap();
        realm
            .transaction(alice(), "seed", |tx| tx.add_resource(item("A")))
            .unwrap();

        let mut tx = realm.open_tx(alice(), "again");
        let err = tx.add_resource(item("A")).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(tx.pending_commands(), 0);

        tx.add_resource(item("B")).unwrap();
        let err = tx.add_resource(item("B")).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(tx.pending_commands(), 1);
    }

    /// Adds `echo-<id>` for every added resource, committing from its worker.
    struct Echo {
        realm: std::sync::Weak<Realm>,
        delay: Duration,
    }

    impl Observer for Echo {
        fn add(&self, _tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
            let originals: Vec<_> = elements
                .iter()
                .filter(|e| !e.id().starts_with("echo-"))
                .collect();
            if originals.is_empty() {
                return Ok(());
            }
            std::thread::sleep(self.delay);
            let realm = self.realm.upgrade().ok_or("realm dropped")?;
            for e in originals {
                let echo = Resource::new(format!("echo-{}", e.id()), "echo", "Echo");
                realm.transaction(Credential::system("echo"), "echo", |tx| tx.add_resource(echo))?;
            }
            Ok(())
        }
    }

    #[test]
    fn commits_do_not_wait_for_a_full_observer_queue() {
        let realm = Arc::new(
            Realm::initialize(
                RealmConfig::new("r", DataStoreMode::Transient),
                RealmContext {
                    observer_queue_capacity: 1,
                    ..RealmContext::default()
                },
            )
            .unwrap(),
        );
        realm.start().unwrap();
        let delay = Duration::from_millis(200);
        realm.observers().register(
            "Resource",
            Arc::new(Echo {
                realm: Arc::downgrade(&realm),
                delay,
            }),
        );

        let started = Instant::now();
        for id in ["A", "B", "C", "D"] {
            realm
                .transaction(alice(), "create", |tx| tx.add_resource(item(id)))
                .unwrap();
        }
        assert!(started.elapsed() < delay, "commits waited {:?}", started.elapsed());
        assert!(realm.observers().backlog("Resource") > 1);

        realm.observers().drain();
        for id in ["A", "B", "C", "D"] {
            assert!(realm.resources().contains("Echo", &format!("echo-{id}")).unwrap());
        }
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let realm = Realm::transient("r").unwrap();
        let mut tx = realm.open_tx(alice(), "bad");
        let err = tx.add_resource(Resource::new("a/b", "AB", "Item")).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        let err = tx.add_order(Order::new("o1", "O1", "")).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(tx.pending_commands(), 0);
    }

    #[test]
    fn remove_then_add_in_one_transaction_is_allowed() {
        let realm = Realm::transient("r").unwrap();
        realm
            .transaction(alice(), "seed", |tx| tx.add_resource(item("A")))
            .unwrap();

        let mut tx = realm.open_tx(alice(), "replace");
        tx.remove_resource(item("A")).unwrap();
        assert!(matches!(
            tx.update_resource(item("A")).unwrap_err(),
            CoreError::NotFound { .. }
        ));
        tx.add_resource(item("A").with_bag(ParameterBag::new("b", "B", "Bag")))
            .unwrap();
        tx.commit().unwrap();

        let stored = realm.resources().get("Item", "A").unwrap().unwrap();
        assert!(stored.bag("b").is_some());
    }

    #[test]
    fn update_and_remove_require_existence() {
        let realm = Realm::transient("r").unwrap();
        let mut tx = realm.open_tx(alice(), "missing");
        assert!(matches!(
            tx.update_resource(item("X")).unwrap_err(),
            CoreError::NotFound { .. }
        ));
        assert!(matches!(
            tx.remove_activity(Activity::new("X", "X", "Plan")).unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }

    #[test]
    fn failure_undoes_in_reverse_and_skips_the_rest() {
        let realm = Realm::transient("r").unwrap();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let mut tx = realm.open_tx(alice(), "batch");
        tx.add_command(Journaled::new("a", &journal)).unwrap();
        tx.add_command(Journaled::new("b", &journal)).unwrap();
        tx.add_command(Journaled::new("c", &journal).failing()).unwrap();
        tx.add_command(Journaled::new("d", &journal)).unwrap();
        let err = tx.commit().unwrap_err();

        assert!(matches!(err, CoreError::Execution { .. }));
        assert_eq!(
            *journal.lock(),
            vec!["do:a", "do:b", "undo:b", "undo:a"]
        );
        assert!(realm.locks().is_empty());
        assert_eq!(realm.stats().transactions_failed(), 1);
        assert_eq!(realm.stats().commands_undone(), 2);
    }

    #[test]
    fn failed_commit_restores_elements() {
        let realm = Realm::transient("r").unwrap();
        realm
            .transaction(alice(), "seed", |tx| tx.add_resource(item("A")))
            .unwrap();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let mut tx = realm.open_tx(alice(), "mixed");
        let mut changed = item("A");
        changed.name = "changed".into();
        tx.update_resource(changed).unwrap();
        tx.add_resource(item("B")).unwrap();
        tx.remove_resource(item("A")).unwrap();
        tx.add_command(Journaled::new("boom", &journal).failing()).unwrap();
        assert!(tx.commit().is_err());

        let a = realm.resources().get("Item", "A").unwrap().unwrap();
        assert_eq!(a.name, "A");
        assert_eq!(a.version, 0);
        assert!(!realm.resources().contains("Item", "B").unwrap());
        assert_eq!(realm.audit_trail().count(AccessType::Update), 0);
    }

    #[test]
    fn failure_is_published_to_the_operations_log() {
        let (realm, log) = realm_with_log();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let mut tx = realm.open_tx(alice(), "import");
        tx.add_log_message(LogMessage::new(
            "r",
            "alice",
            Locator::parse("Resource/Item/A").unwrap(),
            LogSeverity::Info,
            "import.done",
            "never published",
        ));
        tx.add_command(Journaled::new("x", &journal).failing()).unwrap();
        assert!(tx.commit().is_err());
        log.drain();

        let messages = log.get_messages("r");
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.key, "transaction.failed");
        assert_eq!(message.severity, LogSeverity::Error);
        assert_eq!(message.locator, Locator::for_transaction("r", "import"));
        assert_eq!(
            message.values.get("locator").map(String::as_str),
            Some("Resource/Journal/x")
        );
    }

    #[test]
    fn log_messages_are_published_on_commit() {
        let (realm, log) = realm_with_log();
        let locator = Locator::parse("Resource/Item/A").unwrap();
        realm
            .transaction(alice(), "import", |tx| {
                tx.add_resource(item("A"))?;
                tx.add_log_message(LogMessage::new(
                    "r",
                    "alice",
                    locator.clone(),
                    LogSeverity::Info,
                    "import.done",
                    "imported",
                ));
                Ok(())
            })
            .unwrap();
        log.drain();
        assert_eq!(log.get_messages_for("r", &locator).map(|m| m.len()), Some(1));
    }

    #[test]
    fn suppress_flags_skip_notification_and_audits() {
        let realm = Realm::transient("r").unwrap();
        let recorder = Arc::new(Recorder::default());
        realm.observers().register("Resource", recorder.clone());

        let mut tx = realm.open_tx(alice(), "quiet");
        tx.set_suppress_updates(true);
        tx.set_suppress_audits(true);
        assert!(tx.is_suppress_updates() && tx.is_suppress_audits());
        tx.add_resource(item("A")).unwrap();
        tx.commit().unwrap();

        realm.observers().drain();
        assert!(recorder.seen.lock().is_empty());
        assert!(realm.audit_trail().is_empty());
        assert!(realm.resources().contains("Item", "A").unwrap());
    }

    #[test]
    fn add_then_remove_publishes_nothing() {
        let realm = Realm::transient("r").unwrap();
        let recorder = Arc::new(Recorder::default());
        realm.observers().register("Resource", recorder.clone());

        let mut tx = realm.open_tx(alice(), "noop");
        tx.add_resource(item("A")).unwrap();
        tx.remove_resource(item("A")).unwrap();
        let result = tx.commit().unwrap();

        realm.observers().drain();
        assert_eq!(result.changes, 0);
        assert!(recorder.seen.lock().is_empty());
        assert!(realm.audit_trail().is_empty());
    }

    #[test]
    fn read_only_close_discards_commands() {
        let realm = Realm::transient("r").unwrap();
        let mut tx = realm.open_tx(alice(), "peek");
        tx.add_resource(item("A")).unwrap();
        assert!(tx.needs_commit());
        let result = tx.close().unwrap();
        assert_eq!(result.strategy, CloseStrategy::ReadOnly);
        assert_eq!(result.commands, 0);
        assert!(!realm.resources().contains("Item", "A").unwrap());
    }

    #[test]
    fn rollback_undoes_flushed_commands() {
        let realm = Realm::transient("r").unwrap();
        let mut tx = realm.open_tx(alice(), "flushed");
        tx.add_resource(item("A")).unwrap();
        tx.flush().unwrap();
        assert!(realm.resources().contains("Item", "A").unwrap());
        assert!(tx.holds_lock(&item("A").locator()));

        let result = tx.rollback();
        assert_eq!(result.state, TransactionState::Closed);
        assert!(!realm.resources().contains("Item", "A").unwrap());
        assert!(realm.locks().is_empty());
        assert_eq!(realm.stats().transactions_rolled_back(), 1);
    }

    #[test]
    fn fail_marks_for_rollback() {
        let realm = Realm::transient("r").unwrap();
        let err = realm
            .transaction(alice(), "abort", |tx| {
                tx.add_resource(item("A"))?;
                tx.flush()?;
                Err::<(), _>(tx.fail("changed my mind"))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Execution { .. }));
        assert!(!realm.resources().contains("Item", "A").unwrap());
    }

    #[test]
    fn drop_releases_locks_and_undoes() {
        let realm = Realm::transient("r").unwrap();
        {
            let mut tx = realm.open_tx(alice(), "forgotten");
            tx.add_resource(item("A")).unwrap();
            tx.flush().unwrap();
            assert!(!realm.locks().is_empty());
        }
        assert!(realm.locks().is_empty());
        assert!(!realm.resources().contains("Item", "A").unwrap());
    }

    #[test]
    fn commands_after_close_are_rejected() {
        let realm = Realm::transient("r").unwrap();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut tx = realm.open_tx(alice(), "failing flush");
        tx.add_command(Journaled::new("x", &journal).failing()).unwrap();
        assert!(tx.flush().is_err());
        assert_eq!(tx.state(), TransactionState::Failed);
        assert!(matches!(
            tx.add_command(Journaled::new("y", &journal)).unwrap_err(),
            CoreError::InvalidOperation { .. }
        ));
        assert_eq!(tx.close().unwrap().state, TransactionState::Failed);
    }

    #[test]
    fn early_release_is_idempotent() {
        let realm = Realm::transient("r").unwrap();
        let locator = item("A").locator();
        let mut tx = realm.open_tx(alice(), "early");
        tx.lock(&locator).unwrap();
        assert!(realm.locks().is_locked(&locator));
        tx.release_lock(&locator).unwrap();
        tx.release_lock(&locator).unwrap();
        assert!(!realm.locks().is_locked(&locator));
    }

    #[test]
    fn missing_privilege_undoes_earlier_commands() {
        let table = Arc::new(PrivilegeTable::new());
        table.grant("alice", Operation::Add, ElementKind::Resource);
        let realm = Realm::initialize(
            RealmConfig::new("r", DataStoreMode::Transient),
            RealmContext {
                authorization: table.clone(),
                ..RealmContext::default()
            },
        )
        .unwrap();
        realm.start().unwrap();

        let mut tx = realm.open_tx(alice(), "sneaky");
        tx.add_resource(item("A")).unwrap();
        tx.add_order(Order::new("o", "o", "Sale")).unwrap();
        let err = tx.commit().unwrap_err();

        assert!(matches!(err, CoreError::AccessDenied { .. }));
        assert!(err.kind().is_user_facing());
        assert!(!realm.resources().contains("Item", "A").unwrap());
    }

    #[test]
    fn reads_resolve_templates_references_and_locators() {
        let realm = Realm::transient("r").unwrap();
        let bag = ParameterBag::new("params", "Params", "Params").with(Parameter::new(
            "color",
            "Color",
            ParameterValue::String("red".into()),
        ));
        realm
            .transaction(alice(), "seed", |tx| {
                tx.add_resource(Resource::new("Car", "Car template", TEMPLATE))?;
                tx.add_resource(Resource::new("c1", "Car 1", "Car").with_bag(bag.clone()))?;
                tx.add_activity(
                    Activity::new("trip", "Trip", "Plan")
                        .with_action(Action::new("drive", "Drive", "Car", "c1")),
                )
            })
            .unwrap();

        let mut tx = realm.open_tx(alice(), "read");
        assert_eq!(tx.get_resource_template_or_fail("Car").unwrap().id, "Car");
        assert!(matches!(
            tx.get_order_template_or_fail("Car").unwrap_err(),
            CoreError::NotFound { .. }
        ));

        let reference = Parameter::reference("car", INTERPRETATION_RESOURCE_REF, "Car", "c1");
        assert_eq!(tx.get_resource_by_ref(&reference).unwrap().unwrap().id, "c1");
        let plain = Parameter::new("car", "Car", ParameterValue::String("c1".into()));
        assert!(matches!(
            tx.get_resource_by_ref(&plain).unwrap_err(),
            CoreError::Validation { .. }
        ));

        let trip = tx.get_activity_by_or_fail("Plan", "trip").unwrap();
        let action = trip.action("drive").unwrap().clone();
        assert_eq!(tx.get_resource_for(&action).unwrap().unwrap().id, "c1");

        let found = tx
            .find_element(&Locator::parse("Resource/Car/c1/Bag/params/color").unwrap())
            .unwrap();
        assert_eq!(
            found,
            FoundElement::Parameter(bag.get("color").unwrap().clone())
        );
        assert!(matches!(
            tx.find_element(&Locator::parse("Resource/Car/c1/Bag/nope").unwrap())
                .unwrap_err(),
            CoreError::NotFound { .. }
        ));
        assert!(matches!(
            tx.find_element(&Locator::parse("Resource/Car").unwrap()).unwrap_err(),
            CoreError::NotFound { .. }
        ));

        assert_eq!(tx.stream_resources(&[]).unwrap().len(), 2);
        assert_eq!(tx.stream_resources(&["Car"]).unwrap().len(), 1);
    }

    #[test]
    fn audit_queries_are_audited_unless_suppressed() {
        let realm = Realm::transient("r").unwrap();
        let mut tx = realm.open_tx(alice(), "audit");
        tx.query_audits(None);
        tx.close().unwrap();
        assert_eq!(realm.audit_trail().query(Some("Audit")).len(), 1);

        let mut tx = realm.open_tx(alice(), "audit");
        tx.set_suppress_audits_for_audits(true);
        tx.query_audits(None);
        tx.close().unwrap();
        assert_eq!(realm.audit_trail().query(Some("Audit")).len(), 1);
    }

    #[test]
    fn reads_are_audited_when_configured() {
        let realm = Realm::initialize(
            RealmConfig::new("r", DataStoreMode::Transient).audit_trail_for_read(true),
            RealmContext::default(),
        )
        .unwrap();
        realm.start().unwrap();
        realm
            .transaction(alice(), "seed", |tx| tx.add_resource(item("A")))
            .unwrap();

        let mut tx = realm.open_tx(alice(), "read");
        tx.get_resource_by("Item", "A").unwrap();
        tx.get_resource_by("Item", "missing").unwrap();
        tx.close().unwrap();
        assert_eq!(realm.audit_trail().count(AccessType::Read), 1);
    }

    #[test]
    fn transactional_reads_are_memoized() {
        let port = Arc::new(InMemoryPersistence::with_elements([item("A")]));
        let mut persistence = Persistence::in_memory();
        persistence.resources = port.clone();
        let realm = Realm::initialize(
            RealmConfig::new("r", DataStoreMode::Transactional),
            RealmContext {
                persistence: Some(persistence),
                ..RealmContext::default()
            },
        )
        .unwrap();
        realm.start().unwrap();

        let mut tx = realm.open_tx(alice(), "read");
        assert!(tx.get_resource_by("Item", "A").unwrap().is_some());
        port.remove(&item("A")).unwrap();
        assert!(tx.get_resource_by("Item", "A").unwrap().is_some());
        tx.close().unwrap();

        let mut tx = realm.open_tx(alice(), "read again");
        assert!(tx.get_resource_by("Item", "A").unwrap().is_none());
    }

    proptest! {
        #[test]
        fn undo_runs_in_reverse_of_execution(total in 1usize..12, fail_at in 0usize..12) {
            let realm = Realm::transient("r").unwrap();
            let journal = Arc::new(Mutex::new(Vec::new()));
            let mut tx = realm.open_tx(alice(), "prop");
            for i in 0..total {
                let command = Journaled::new(&i.to_string(), &journal);
                let command = if i == fail_at { command.failing() } else { command };
                tx.add_command(command).unwrap();
            }
            let outcome = tx.commit();

            let executed = fail_at.min(total);
            let mut expected: Vec<String> = (0..executed).map(|i| format!("do:{i}")).collect();
            if fail_at < total {
                prop_assert!(outcome.is_err());
                expected.extend((0..executed).rev().map(|i| format!("undo:{i}")));
            } else {
                prop_assert!(outcome.is_ok());
            }
            prop_assert_eq!(&*journal.lock(), &expected);
            prop_assert!(realm.locks().is_empty());
        }
    }
}
