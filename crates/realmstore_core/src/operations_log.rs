//! Bounded, per-realm operations log.

use crate::config::DataStoreMode;
use crate::error::CoreResult;
use parking_lot::{Mutex, RwLock};
use realmstore_model::{Locator, LogMessage};
use realmstore_storage::LogMessagePort;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Messages of one realm, indexed by locator, bounded by locator count.
///
/// Locators are evicted oldest-inserted first once there are more than the
/// configured maximum. The bound is independent of the order list's.
#[derive(Debug, Default)]
struct LocatorIndex {
    entries: HashMap<Locator, LocatorEntry>,
    order: VecDeque<Locator>,
}

/// Messages of one locator in insertion order, deduplicated by id.
#[derive(Debug, Default)]
struct LocatorEntry {
    messages: Vec<LogMessage>,
    ids: HashSet<Uuid>,
}

impl LocatorEntry {
    fn push(&mut self, message: LogMessage) {
        if self.ids.insert(message.id) {
            self.messages.push(message);
        }
    }
}

impl LocatorIndex {
    fn insert(&mut self, message: LogMessage, max: usize) {
        if let Some(entry) = self.entries.get_mut(&message.locator) {
            entry.push(message);
            return;
        }
        let locator = message.locator.clone();
        let mut entry = LocatorEntry::default();
        entry.push(message);
        self.order.push_back(locator.clone());
        self.entries.insert(locator, entry);
        self.evict(max);
    }

    fn evict(&mut self, max: usize) {
        while self.entries.len() > max {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn remove(&mut self, locator: &Locator) {
        if self.entries.remove(locator).is_some() {
            self.order.retain(|l| l != locator);
        }
    }
}

#[derive(Debug, Default)]
struct RealmLog {
    messages: VecDeque<LogMessage>,
    by_locator: LocatorIndex,
}

enum LogJob {
    Persist {
        log: Arc<Mutex<RealmLog>>,
        message: LogMessage,
    },
    Barrier(Sender<()>),
}

struct Inner {
    max_messages: AtomicUsize,
    realms: RwLock<HashMap<String, Arc<Mutex<RealmLog>>>>,
    persisted: RwLock<HashSet<String>>,
    port: Option<Arc<dyn LogMessagePort>>,
}

impl Inner {
    fn realm_log(&self, realm: &str) -> Arc<Mutex<RealmLog>> {
        if let Some(log) = self.realms.read().get(realm) {
            return Arc::clone(log);
        }
        Arc::clone(self.realms.write().entry(realm.to_string()).or_default())
    }

    /// Prunes the realm and persists `message` in one critical section.
    fn persist_and_prune(&self, log: &Mutex<RealmLog>, message: &LogMessage) {
        let max = self.max_messages.load(Ordering::Relaxed);
        let mut log = log.lock();

        let mut evicted = Vec::new();
        if log.messages.len() > max {
            let count = prune_count(max).min(log.messages.len());
            info!(realm = %message.realm, count, "pruning operations log");
            evicted.extend(log.messages.drain(..count));
        }

        let Some(port) = self.port.as_ref() else {
            return;
        };
        if !self.persisted.read().contains(&message.realm) {
            return;
        }
        if !evicted.is_empty() {
            if let Err(e) = port.remove_all(&evicted) {
                error!(realm = %message.realm, error = %e, "failed to remove pruned log messages");
            }
        }
        // a message pruned before its own job ran is never written
        if log.messages.contains(message) {
            if let Err(e) = port.save(message) {
                error!(realm = %message.realm, key = %message.key, error = %e, "failed to persist log message");
            }
        }
    }
}

/// Number of messages removed when a realm exceeds `max`: ten percent of
/// the configured maximum, at least one.
#[must_use]
pub fn prune_count(max: usize) -> usize {
    (max / 10).max(1)
}

/// The operations log of every realm of an agent.
///
/// [`add_message`](Self::add_message) makes a message visible immediately;
/// pruning and persistence run on a background worker.
pub struct OperationsLog {
    inner: Arc<Inner>,
    jobs: Mutex<Option<Sender<LogJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OperationsLog {
    /// Creates a log holding at most `max_messages` per realm.
    ///
    /// Without a port nothing is persisted.
    pub fn new(max_messages: usize, port: Option<Arc<dyn LogMessagePort>>) -> Self {
        let inner = Arc::new(Inner {
            max_messages: AtomicUsize::new(max_messages),
            realms: RwLock::new(HashMap::new()),
            persisted: RwLock::new(HashSet::new()),
            port,
        });

        let (sender, receiver) = mpsc::channel();
        let worker_inner = Arc::clone(&inner);
        let (jobs, worker) = match thread::Builder::new()
            .name("operations-log".into())
            .spawn(move || run_worker(&worker_inner, &receiver))
        {
            Ok(handle) => (Some(sender), Some(handle)),
            Err(e) => {
                error!(error = %e, "failed to start operations log worker, persisting inline");
                (None, None)
            }
        };

        Self {
            inner,
            jobs: Mutex::new(jobs),
            worker: Mutex::new(worker),
        }
    }

    /// Loads the newest messages of every non-transient realm.
    ///
    /// Only realms passed here are ever persisted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the port cannot be read.
    pub fn start<'a, I>(&self, realms: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (&'a str, DataStoreMode)>,
    {
        let max = self.max_messages();
        for (realm, mode) in realms {
            if mode.is_transient() {
                continue;
            }
            let Some(port) = self.inner.port.as_ref() else {
                continue;
            };
            info!(realm, "loading operations log");
            let loaded = port.query_latest(realm, max)?;
            info!(realm, count = loaded.len(), "operations log loaded");

            let log = self.inner.realm_log(realm);
            let mut log = log.lock();
            for message in loaded {
                log.by_locator.insert(message.clone(), max);
                log.messages.push_back(message);
            }
            self.inner.persisted.write().insert(realm.to_string());
        }
        Ok(())
    }

    /// Returns the per-realm bound.
    #[must_use]
    pub fn max_messages(&self) -> usize {
        self.inner.max_messages.load(Ordering::Relaxed)
    }

    /// Changes the per-realm bound. Applies from the next message on.
    pub fn set_max_messages(&self, max_messages: usize) {
        self.inner.max_messages.store(max_messages, Ordering::Relaxed);
    }

    /// Appends a message to its realm's list and locator index, then queues
    /// pruning and persistence.
    pub fn add_message(&self, message: LogMessage) {
        let max = self.max_messages();
        let log = self.inner.realm_log(&message.realm);
        {
            let mut guard = log.lock();
            guard.messages.push_back(message.clone());
            guard.by_locator.insert(message.clone(), max);
        }
        debug!(realm = %message.realm, key = %message.key, locator = %message.locator, "log message added");

        let job = LogJob::Persist { log, message };
        let rejected = match self.jobs.lock().as_ref() {
            Some(sender) => sender.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        if let Some(LogJob::Persist { log, message }) = rejected {
            self.inner.persist_and_prune(&log, &message);
        }
    }

    /// Returns a copy of a realm's messages, oldest first.
    #[must_use]
    pub fn get_messages(&self, realm: &str) -> Vec<LogMessage> {
        self.inner
            .realms
            .read()
            .get(realm)
            .map(|log| log.lock().messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a copy of the messages concerning `locator`, if any.
    #[must_use]
    pub fn get_messages_for(&self, realm: &str, locator: &Locator) -> Option<Vec<LogMessage>> {
        let log = self.inner.realms.read().get(realm).map(Arc::clone)?;
        let guard = log.lock();
        guard
            .by_locator
            .entries
            .get(locator)
            .map(|entry| entry.messages.clone())
    }

    /// Forgets the locator index entry of `locator`. The order list is kept.
    pub fn clear_messages(&self, realm: &str, locator: &Locator) {
        if let Some(log) = self.inner.realms.read().get(realm) {
            log.lock().by_locator.remove(locator);
        }
    }

    /// Blocks until every queued message was pruned and persisted.
    pub fn drain(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        let sent = self
            .jobs
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.send(LogJob::Barrier(ack_tx)).is_ok());
        if sent {
            let _ = ack_rx.recv();
        }
    }

    /// Finishes queued work and stops the worker. Later messages are
    /// persisted inline.
    pub fn shutdown(&self) {
        drop(self.jobs.lock().take());
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("operations log worker panicked");
            }
            debug!("operations log shut down");
        }
    }
}

impl Drop for OperationsLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for OperationsLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationsLog")
            .field("max_messages", &self.max_messages())
            .field("realms", &self.inner.realms.read().len())
            .finish_non_exhaustive()
    }
}

fn run_worker(inner: &Inner, receiver: &Receiver<LogJob>) {
    for job in receiver {
        match job {
            LogJob::Persist { log, message } => inner.persist_and_prune(&log, &message),
            LogJob::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
