//! Observer registry with per-tag asynchronous delivery.
//!
//! Committed changes are handed to [`ObserverRegistry::notify`], which splits
//! the event by element kind tag and queues each part on that tag's worker
//! thread. Each tag has exactly one worker, so:
//!
//! - events for the same tag are delivered in submission order, one at a time
//! - different tags are delivered concurrently
//! - the committing thread never runs observer code and never waits on a
//!   worker
//!
//! Queues are unbounded. A backlog above the configured capacity is logged
//! as a warning. Observer failures and panics are logged and otherwise
//! ignored.

use parking_lot::{Mutex, RwLock};
use realmstore_model::Element;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Error an observer may return. It is logged, never propagated.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber to committed changes of one or more element kinds.
///
/// All methods default to doing nothing, so an observer only implements the
/// notifications it cares about.
pub trait Observer: Send + Sync {
    /// Elements of `tag` were added.
    fn add(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        let _ = (tag, elements);
        Ok(())
    }

    /// Elements of `tag` were updated.
    fn update(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        let _ = (tag, elements);
        Ok(())
    }

    /// Elements of `tag` were removed.
    fn remove(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        let _ = (tag, elements);
        Ok(())
    }
}

/// The net changes of one commit, keyed by element kind tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserverEvent {
    /// Added elements.
    pub added: BTreeMap<String, Vec<Element>>,
    /// Updated elements.
    pub updated: BTreeMap<String, Vec<Element>>,
    /// Removed elements.
    pub removed: BTreeMap<String, Vec<Element>>,
}

impl ObserverEvent {
    /// Creates an empty event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an added element under its kind tag.
    pub fn add(&mut self, element: Element) {
        push(&mut self.added, element);
    }

    /// Records an updated element under its kind tag.
    pub fn update(&mut self, element: Element) {
        push(&mut self.updated, element);
    }

    /// Records a removed element under its kind tag.
    pub fn remove(&mut self, element: Element) {
        push(&mut self.removed, element);
    }

    /// Returns true if no element is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.values().all(Vec::is_empty)
            && self.updated.values().all(Vec::is_empty)
            && self.removed.values().all(Vec::is_empty)
    }

    /// Returns every tag with at least one element.
    #[must_use]
    pub fn tags(&self) -> BTreeSet<String> {
        [&self.added, &self.updated, &self.removed]
            .into_iter()
            .flat_map(|m| m.iter().filter(|(_, v)| !v.is_empty()).map(|(k, _)| k.clone()))
            .collect()
    }

    fn take_batch(&mut self, tag: &str) -> TagBatch {
        TagBatch {
            added: self.added.remove(tag).unwrap_or_default(),
            updated: self.updated.remove(tag).unwrap_or_default(),
            removed: self.removed.remove(tag).unwrap_or_default(),
        }
    }
}

fn push(map: &mut BTreeMap<String, Vec<Element>>, element: Element) {
    map.entry(element.kind().tag().to_string())
        .or_default()
        .push(element);
}

struct TagBatch {
    added: Vec<Element>,
    updated: Vec<Element>,
    removed: Vec<Element>,
}

enum TagMessage {
    Batch(TagBatch),
    Barrier(mpsc::Sender<()>),
}

struct TagWorker {
    sender: Sender<TagMessage>,
    backlog: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

type ObserverTable = Arc<RwLock<HashMap<String, Vec<Arc<dyn Observer>>>>>;

/// Subscription table from element kind tag to observers.
pub struct ObserverRegistry {
    realm: String,
    capacity: usize,
    observers: ObserverTable,
    workers: Mutex<HashMap<String, TagWorker>>,
    shut_down: AtomicBool,
}

impl ObserverRegistry {
    /// Creates a registry that warns once a tag has more than `capacity`
    /// undelivered events.
    pub fn new(realm: impl Into<String>, capacity: usize) -> Self {
        Self {
            realm: realm.into(),
            capacity: capacity.max(1),
            observers: Arc::new(RwLock::new(HashMap::new())),
            workers: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Subscribes `observer` to `tag`.
    pub fn register(&self, tag: impl Into<String>, observer: Arc<dyn Observer>) {
        let tag = tag.into();
        debug!(realm = %self.realm, %tag, "observer registered");
        self.observers.write().entry(tag).or_default().push(observer);
    }

    /// Unsubscribes `observer` from `tag`, by identity.
    ///
    /// Returns true if it was registered.
    pub fn unregister(&self, tag: &str, observer: &Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.write();
        let Some(list) = observers.get_mut(tag) else {
            return false;
        };
        let before = list.len();
        list.retain(|o| !Arc::ptr_eq(o, observer));
        before != list.len()
    }

    /// Returns the number of observers subscribed to `tag`.
    #[must_use]
    pub fn observer_count(&self, tag: &str) -> usize {
        self.observers.read().get(tag).map_or(0, Vec::len)
    }

    /// Queues an event for delivery and returns without waiting for it.
    ///
    /// Empty events and tags without observers are skipped. Never blocks,
    /// so observers may commit to the realm that notified them.
    pub fn notify(&self, mut event: ObserverEvent) {
        if event.is_empty() {
            return;
        }
        if self.shut_down.load(Ordering::Acquire) {
            warn!(realm = %self.realm, "observer registry is shut down, event dropped");
            return;
        }

        for tag in event.tags() {
            if self.observer_count(&tag) == 0 {
                continue;
            }
            let batch = event.take_batch(&tag);
            let Some((sender, backlog)) = self.sender_for(&tag) else {
                continue;
            };
            let depth = backlog.fetch_add(1, Ordering::AcqRel) + 1;
            if depth == self.capacity + 1 {
                warn!(realm = %self.realm, %tag, capacity = self.capacity, "observer backlog above capacity");
            }
            if sender.send(TagMessage::Batch(batch)).is_err() {
                backlog.fetch_sub(1, Ordering::AcqRel);
                error!(realm = %self.realm, %tag, "observer worker gone, event dropped");
            }
        }
    }

    /// Returns the number of undelivered events queued for `tag`.
    #[must_use]
    pub fn backlog(&self, tag: &str) -> usize {
        self.workers
            .lock()
            .get(tag)
            .map_or(0, |w| w.backlog.load(Ordering::Acquire))
    }

    fn sender_for(&self, tag: &str) -> Option<(Sender<TagMessage>, Arc<AtomicUsize>)> {
        let mut workers = self.workers.lock();
        if let Some(worker) = workers.get(tag) {
            return Some((worker.sender.clone(), Arc::clone(&worker.backlog)));
        }

        let (sender, receiver) = mpsc::channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let observers = Arc::clone(&self.observers);
        let worker_backlog = Arc::clone(&backlog);
        let worker_tag = tag.to_string();
        let realm = self.realm.clone();
        let spawned = thread::Builder::new()
            .name(format!("observer-{}-{tag}", self.realm))
            .spawn(move || run_worker(&realm, &worker_tag, &observers, &worker_backlog, &receiver));

        match spawned {
            Ok(handle) => {
                debug!(realm = %self.realm, %tag, "observer worker started");
                workers.insert(
                    tag.to_string(),
                    TagWorker {
                        sender: sender.clone(),
                        backlog: Arc::clone(&backlog),
                        handle,
                    },
                );
                Some((sender, backlog))
            }
            Err(e) => {
                error!(realm = %self.realm, %tag, error = %e, "failed to start observer worker");
                None
            }
        }
    }

    /// Blocks until every event queued before this call was delivered.
    ///
    /// Must not be called from an observer: its own worker would wait on
    /// itself.
    pub fn drain(&self) {
        let senders: Vec<_> = self
            .workers
            .lock()
            .values()
            .map(|w| w.sender.clone())
            .collect();

        let mut acks = Vec::with_capacity(senders.len());
        for sender in senders {
            let (ack_tx, ack_rx) = mpsc::channel();
            if sender.send(TagMessage::Barrier(ack_tx)).is_ok() {
                acks.push(ack_rx);
            }
        }
        for ack in acks {
            let _ = ack.recv();
        }
    }

    /// Delivers what is queued, then stops every worker.
    ///
    /// Later events are dropped with a warning until [`reopen`](Self::reopen).
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers: Vec<_> = self.workers.lock().drain().collect();
        for (tag, worker) in workers {
            drop(worker.sender);
            if worker.handle.join().is_err() {
                error!(realm = %self.realm, %tag, "observer worker panicked");
            }
        }
        debug!(realm = %self.realm, "observer registry shut down");
    }

    /// Accepts events again after [`shutdown`](Self::shutdown). Workers are
    /// started lazily by the next event; subscriptions are kept.
    pub fn reopen(&self) {
        if self.shut_down.swap(false, Ordering::AcqRel) {
            debug!(realm = %self.realm, "observer registry reopened");
        }
    }

    /// Returns true between [`shutdown`](Self::shutdown) and
    /// [`reopen`](Self::reopen).
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for ObserverRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("realm", &self.realm)
            .field("capacity", &self.capacity)
            .field("tags", &self.observers.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn run_worker(
    realm: &str,
    tag: &str,
    observers: &ObserverTable,
    backlog: &AtomicUsize,
    receiver: &Receiver<TagMessage>,
) {
    for message in receiver {
        match message {
            TagMessage::Batch(batch) => {
                let targets: Vec<_> = observers.read().get(tag).cloned().unwrap_or_default();
                deliver(realm, tag, &targets, &batch);
                backlog.fetch_sub(1, Ordering::AcqRel);
            }
            TagMessage::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

type Notify = fn(&dyn Observer, &str, &[Element]) -> Result<(), ObserverError>;

fn deliver(realm: &str, tag: &str, targets: &[Arc<dyn Observer>], batch: &TagBatch) {
    let steps: [(&str, &[Element], Notify); 3] = [
        ("add", &batch.added, |o, t, e| o.add(t, e)),
        ("update", &batch.updated, |o, t, e| o.update(t, e)),
        ("remove", &batch.removed, |o, t, e| o.remove(t, e)),
    ];
    for (operation, elements, notify) in steps {
        if elements.is_empty() {
            continue;
        }
        for observer in targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                notify(observer.as_ref(), tag, elements)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(realm, tag, operation, error = %e, "observer failed");
                }
                Err(payload) => {
                    error!(realm, tag, operation, panic = panic_message(payload.as_ref()), "observer panicked");
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
