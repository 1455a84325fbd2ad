//! Undoable units of mutation.
//!
//! A [`Command`] is registered on a transaction and runs when the transaction
//! commits or flushes. Commands reach the realm only through a
//! [`CommandContext`], which records every change for the observer event and
//! audits and tracks the locks taken for bulk release.
//!
//! # Contract
//!
//! - `validate` checks preconditions and must not change anything.
//! - `do_command` locks what it mutates before mutating it.
//! - `undo` reverses exactly what `do_command` did. It is only called on
//!   commands whose `do_command` succeeded, in reverse order.

use crate::change_set::ChangeSet;
use crate::element_map::ElementMap;
use crate::error::{CoreError, CoreResult};
use crate::privilege::{Credential, ElementDescriptor};
use crate::realm::Realm;
use crate::transaction::{LockSet, ReadCache};
use crate::types::TransactionId;
use realmstore_model::{Activity, Locator, Operation, Order, Resource, RootElement};
use tracing::debug;

/// An undoable mutation bound to one transaction.
pub trait Command: Send {
    /// Short description used in logs.
    fn describe(&self) -> String;

    /// The element or sub-element this command concerns.
    fn locator(&self) -> Locator;

    /// Privilege checked before the command runs, if any.
    fn privilege(&self) -> Option<(Operation, ElementDescriptor)> {
        None
    }

    /// Checks preconditions without side effects.
    ///
    /// # Errors
    ///
    /// Returns a validation or not-found error if the command cannot run.
    fn validate(&self, ctx: &mut CommandContext<'_>) -> CoreResult<()>;

    /// Applies the command.
    ///
    /// # Errors
    ///
    /// Any error aborts the transaction and undoes the commands before this
    /// one.
    fn do_command(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()>;

    /// Reverses a successful [`do_command`](Self::do_command).
    ///
    /// # Errors
    ///
    /// Errors are logged; the remaining commands are still undone.
    fn undo(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()>;
}

/// Rejects a type or id that cannot be a locator segment.
///
/// # Errors
///
/// Returns a validation error naming the offending value.
pub fn check_element_names<T: RootElement>(element: &T) -> CoreResult<()> {
    for (what, value) in [("type", element.type_name()), ("id", element.id())] {
        if !Locator::is_valid_segment(value) {
            return Err(CoreError::validation(format!(
                "{} {what} '{value}' must be non-empty and must not contain '{}'",
                T::KIND,
                Locator::SEPARATOR
            )));
        }
    }
    Ok(())
}

/// Root element kinds stored in a realm's element maps.
pub trait RealmElement: RootElement {
    /// Returns the realm's map for this kind.
    fn map(realm: &Realm) -> &ElementMap<Self>;
}

impl RealmElement for Resource {
    fn map(realm: &Realm) -> &ElementMap<Self> {
        realm.resources()
    }
}

impl RealmElement for Order {
    fn map(realm: &Realm) -> &ElementMap<Self> {
        realm.orders()
    }
}

impl RealmElement for Activity {
    fn map(realm: &Realm) -> &ElementMap<Self> {
        realm.activities()
    }
}

/// A command's view of its transaction.
pub struct CommandContext<'a> {
    pub(crate) realm: &'a Realm,
    pub(crate) tx: TransactionId,
    pub(crate) credential: &'a Credential,
    pub(crate) locks: &'a mut LockSet,
    pub(crate) changes: &'a mut ChangeSet,
    pub(crate) cache: &'a mut ReadCache,
}

impl<'a> CommandContext<'a> {
    /// Returns the realm.
    #[must_use]
    pub fn realm(&self) -> &'a Realm {
        self.realm
    }

    /// Returns the id of the owning transaction.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.tx
    }

    /// Returns the credential of the owning transaction.
    #[must_use]
    pub fn credential(&self) -> &Credential {
        self.credential
    }

    /// Locks `locator` for the owning transaction. The lock is released when
    /// the transaction closes.
    ///
    /// # Errors
    ///
    /// Returns a lock error if the locator stays busy past the timeout.
    pub fn lock(&mut self, locator: &Locator) -> CoreResult<()> {
        self.locks.lock(self.realm, locator, self.tx)
    }

    /// Checks a privilege of the owning transaction's credential.
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
            .assert_has_privilege(self.credential, operation, element)
    }

    /// Reads an element, memoized for the transaction in transactional
    /// realms.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn get<T: RealmElement>(&mut self, type_name: &str, id: &str) -> CoreResult<Option<T>> {
        if let Some(hit) = self.cache.get::<T>(type_name, id) {
            return Ok(Some(hit));
        }
        let found = T::map(self.realm).get(type_name, id)?;
        if let Some(element) = &found {
            self.cache.put(element);
        }
        Ok(found)
    }

    /// Returns true if the element exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn contains<T: RealmElement>(&mut self, type_name: &str, id: &str) -> CoreResult<bool> {
        Ok(self.get::<T>(type_name, id)?.is_some())
    }

    /// Inserts a new element and records an add.
    ///
    /// # Errors
    ///
    /// See [`ElementMap::insert`].
    pub fn insert<T: RealmElement>(&mut self, element: &T) -> CoreResult<()> {
        T::map(self.realm).insert(element)?;
        self.cache.put(element);
        self.changes.record(Operation::Add, element.clone().into_element());
        Ok(())
    }

    /// Replaces an element, bumping its version, and records a modify.
    /// Returns the previous value.
    ///
    /// # Errors
    ///
    /// See [`ElementMap::update`].
    pub fn update<T: RealmElement>(&mut self, element: &mut T) -> CoreResult<T> {
        let previous = T::map(self.realm).update(element)?;
        self.cache.put(element);
        self.changes
            .record(Operation::Modify, element.clone().into_element());
        Ok(previous)
    }

    /// Removes an element and records a remove. Returns the removed value.
    ///
    /// # Errors
    ///
    /// See [`ElementMap::remove`].
    pub fn remove<T: RealmElement>(&mut self, element: &T) -> CoreResult<T> {
        let removed = T::map(self.realm).remove(element)?;
        self.cache.forget::<T>(removed.type_name(), removed.id());
        self.changes
            .record(Operation::Remove, removed.clone().into_element());
        Ok(removed)
    }

    /// Puts an element back as it was. For use in `undo`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn restore<T: RealmElement>(&mut self, element: &T) -> CoreResult<()> {
        T::map(self.realm).restore(element)?;
        self.cache.put(element);
        Ok(())
    }

    /// Drops an element. For use in `undo`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn discard<T: RealmElement>(&mut self, element: &T) -> CoreResult<()> {
        T::map(self.realm).discard(element)?;
        self.cache.forget::<T>(element.type_name(), element.id());
        Ok(())
    }
}

/// Adds a new root element.
#[derive(Debug, Clone)]
pub struct AddElementCommand<T> {
    element: T,
    added: bool,
}

impl<T: RealmElement> AddElementCommand<T> {
    /// Creates the command.
    pub fn new(element: T) -> Self {
        Self {
            element,
            added: false,
        }
    }
}

impl<T: RealmElement> Command for AddElementCommand<T> {
    fn describe(&self) -> String {
        format!("add {}", self.element.locator())
    }

    fn locator(&self) -> Locator {
        self.element.locator()
    }

    fn privilege(&self) -> Option<(Operation, ElementDescriptor)> {
        Some((Operation::Add, ElementDescriptor::of(&self.element)))
    }

    fn validate(&self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        check_element_names(&self.element)?;
        if ctx.contains::<T>(self.element.type_name(), self.element.id())? {
            return Err(CoreError::validation(format!(
                "{} already exists",
                self.element.locator()
            )));
        }
        Ok(())
    }

    fn do_command(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        ctx.lock(&self.element.locator())?;
        ctx.insert(&self.element)?;
        self.added = true;
        debug!(locator = %self.element.locator(), "element added");
        Ok(())
    }

    fn undo(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        if self.added {
            ctx.discard(&self.element)?;
            self.added = false;
        }
        Ok(())
    }
}

/// Replaces an existing root element.
#[derive(Debug, Clone)]
pub struct UpdateElementCommand<T> {
    element: T,
    previous: Option<T>,
}

impl<T: RealmElement> UpdateElementCommand<T> {
    /// Creates the command.
    pub fn new(element: T) -> Self {
        Self {
            element,
            previous: None,
        }
    }
}

impl<T: RealmElement> Command for UpdateElementCommand<T> {
    fn describe(&self) -> String {
        format!("update {}", self.element.locator())
    }

    fn locator(&self) -> Locator {
        self.element.locator()
    }

    fn privilege(&self) -> Option<(Operation, ElementDescriptor)> {
        Some((Operation::Modify, ElementDescriptor::of(&self.element)))
    }

    fn validate(&self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        if !ctx.contains::<T>(self.element.type_name(), self.element.id())? {
            return Err(CoreError::not_found(format!(
                "{} does not exist",
                self.element.locator()
            )));
        }
        Ok(())
    }

    fn do_command(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        ctx.lock(&self.element.locator())?;
        self.previous = Some(ctx.update(&mut self.element)?);
        debug!(locator = %self.element.locator(), version = self.element.version(), "element updated");
        Ok(())
    }

    fn undo(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        if let Some(previous) = self.previous.take() {
            ctx.restore(&previous)?;
            self.element.set_version(previous.version());
        }
        Ok(())
    }
}

/// Removes an existing root element.
#[derive(Debug, Clone)]
pub struct RemoveElementCommand<T> {
    element: T,
    removed: Option<T>,
}

impl<T: RealmElement> RemoveElementCommand<T> {
    /// Creates the command.
    pub fn new(element: T) -> Self {
        Self {
            element,
            removed: None,
        }
    }
}

impl<T: RealmElement> Command for RemoveElementCommand<T> {
    fn describe(&self) -> String {
        format!("remove {}", self.element.locator())
    }

    fn locator(&self) -> Locator {
        self.element.locator()
    }

    fn privilege(&self) -> Option<(Operation, ElementDescriptor)> {
        Some((Operation::Remove, ElementDescriptor::of(&self.element)))
    }

    fn validate(&self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        if !ctx.contains::<T>(self.element.type_name(), self.element.id())? {
            return Err(CoreError::not_found(format!(
                "{} does not exist",
                self.element.locator()
            )));
        }
        Ok(())
    }

    fn do_command(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        ctx.lock(&self.element.locator())?;
        self.removed = Some(ctx.remove(&self.element)?);
        debug!(locator = %self.element.locator(), "element removed");
        Ok(())
    }

    fn undo(&mut self, ctx: &mut CommandContext<'_>) -> CoreResult<()> {
        if let Some(removed) = self.removed.take() {
            ctx.restore(&removed)?;
        }
        Ok(())
    }
}
