//! Per-locator lock table.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex};
use realmstore_model::Locator;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Mutual exclusion keyed by [`Locator`].
///
/// Each locator has at most one owner at a time. Locks are re-entrant for
/// their owner: acquiring a held locator again succeeds immediately and a
/// single release frees it.
///
/// Granularity is the individual locator, so two transactions working on
/// different elements never contend.
pub struct LockTable {
    held: Mutex<HashMap<Locator, TransactionId>>,
    released: Condvar,
    timeout: Duration,
}

impl LockTable {
    /// Creates a lock table whose `acquire` gives up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Returns the acquire timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blocks until no other owner holds `locator`, then records `owner`.
    ///
    /// # Errors
    ///
    /// Returns a lock error if the locator is still held by another owner
    /// when the timeout elapses.
    pub fn acquire(&self, locator: &Locator, owner: TransactionId) -> CoreResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut held = self.held.lock();
        loop {
            match held.get(locator) {
                None => {
                    held.insert(locator.clone(), owner);
                    debug!(%locator, %owner, "lock acquired");
                    return Ok(());
                }
                Some(current) if *current == owner => return Ok(()),
                Some(current) => {
                    let current = *current;
                    if self.released.wait_until(&mut held, deadline).timed_out()
                        && held.get(locator).is_some_and(|o| *o != owner)
                    {
                        warn!(%locator, %owner, holder = %current, "lock wait timed out");
                        return Err(CoreError::lock(
                            locator,
                            format!(
                                "held by {current}, gave up after {} ms",
                                self.timeout.as_millis()
                            ),
                        ));
                    }
                }
            }
        }
    }

    /// Releases `locator` if `owner` holds it.
    ///
    /// Returns true if a lock was released; releasing a lock that `owner`
    /// does not hold is a no-op.
    pub fn release(&self, locator: &Locator, owner: TransactionId) -> bool {
        let mut held = self.held.lock();
        if held.get(locator) == Some(&owner) {
            held.remove(locator);
            drop(held);
            self.released.notify_all();
            debug!(%locator, %owner, "lock released");
            true
        } else {
            false
        }
    }

    /// Releases every given locator held by `owner` in one step.
    ///
    /// Returns the number of locks released.
    pub fn release_all<'a, I>(&self, locators: I, owner: TransactionId) -> usize
    where
        I: IntoIterator<Item = &'a Locator>,
    {
        let mut held = self.held.lock();
        let mut released = 0;
        for locator in locators {
            if held.get(locator) == Some(&owner) {
                held.remove(locator);
                released += 1;
            }
        }
        drop(held);
        if released > 0 {
            self.released.notify_all();
            debug!(%owner, released, "locks released");
        }
        released
    }

    /// Returns the owner of `locator`, if locked.
    #[must_use]
    pub fn holder(&self, locator: &Locator) -> Option<TransactionId> {
        self.held.lock().get(locator).copied()
    }

    /// Returns true if `locator` is locked by anyone.
    #[must_use]
    pub fn is_locked(&self, locator: &Locator) -> bool {
        self.held.lock().contains_key(locator)
    }

    /// Returns the number of locked locators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    /// Returns true if nothing is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("held", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn loc(id: &str) -> Locator {
        Locator::parse(&format!("Resource/Item/{id}")).unwrap()
    }

    #[test]
    fn acquire_and_release() {
        let table = LockTable::new(Duration::from_millis(50));
        let t1 = TransactionId::new(1);
        table.acquire(&loc("A"), t1).unwrap();
        assert_eq!(table.holder(&loc("A")), Some(t1));
        assert!(table.release(&loc("A"), t1));
        assert!(table.is_empty());
    }

    #[test]
    fn reacquire_by_owner_is_immediate() {
        let table = LockTable::new(Duration::from_millis(10));
        let t1 = TransactionId::new(1);
        table.acquire(&loc("A"), t1).unwrap();
        table.acquire(&loc("A"), t1).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn release_by_non_owner_is_noop() {
        let table = LockTable::new(Duration::from_millis(10));
        table.acquire(&loc("A"), TransactionId::new(1)).unwrap();
        assert!(!table.release(&loc("A"), TransactionId::new(2)));
        assert!(!table.release(&loc("B"), TransactionId::new(1)));
        assert!(table.is_locked(&loc("A")));
    }

    #[test]
    fn busy_locator_times_out() {
        let table = LockTable::new(Duration::from_millis(20));
        table.acquire(&loc("A"), TransactionId::new(1)).unwrap();
        let err = table.acquire(&loc("A"), TransactionId::new(2)).unwrap_err();
        assert!(matches!(err, CoreError::Lock { .. }));
    }

    #[test]
    fn different_locators_do_not_contend() {
        let table = LockTable::new(Duration::from_millis(10));
        table.acquire(&loc("A"), TransactionId::new(1)).unwrap();
        table.acquire(&loc("B"), TransactionId::new(2)).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let table = Arc::new(LockTable::new(Duration::from_secs(5)));
        let t1 = TransactionId::new(1);
        table.acquire(&loc("A"), t1).unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || table.acquire(&loc("A"), TransactionId::new(2)))
        };
        thread::sleep(Duration::from_millis(20));
        table.release_all([loc("A")].iter(), t1);

        waiter.join().unwrap().unwrap();
        assert_eq!(table.holder(&loc("A")), Some(TransactionId::new(2)));
    }

    #[test]
    fn at_most_one_holder_under_contention() {
        let table = Arc::new(LockTable::new(Duration::from_secs(10)));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let owner = TransactionId::new(i + 1);
                    barrier.wait();
                    for _ in 0..20 {
                        table.acquire(&loc("hot"), owner).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        table.release(&loc("hot"), owner);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn release_is_idempotent(ids in proptest::collection::vec("[a-c]", 1..10), releases in 1usize..4) {
            let table = LockTable::new(Duration::from_millis(5));
            let owner = TransactionId::new(1);
            for id in &ids {
                table.acquire(&loc(id), owner).unwrap();
            }
            let locked = table.len();
            for _ in 0..releases {
                table.release(&loc(&ids[0]), owner);
            }
            prop_assert_eq!(table.len(), locked - 1);
            prop_assert!(!table.is_locked(&loc(&ids[0])));
        }
    }
}
