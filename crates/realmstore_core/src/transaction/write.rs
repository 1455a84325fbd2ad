//! Mutations of a transaction. Each registers a built-in command after an
//! eager check against the realm and the commands already registered.

use super::{PendingKey, Transaction};
use crate::command::{
    check_element_names, AddElementCommand, RealmElement, RemoveElementCommand,
    UpdateElementCommand,
};
use crate::error::{CoreError, CoreResult};
use realmstore_model::{Activity, Order, Resource, RootElement};

fn key_of<T: RootElement>(element: &T) -> PendingKey {
    (T::KIND, element.type_name().to_string(), element.id().to_string())
}

impl Transaction<'_> {
    /// True if the element will exist once the registered commands ran.
    fn will_exist<T: RealmElement>(&self, element: &T) -> CoreResult<bool> {
        let key = key_of(element);
        if self.pending_adds.contains(&key) {
            return Ok(true);
        }
        if self.pending_removes.contains(&key) {
            return Ok(false);
        }
        T::map(self.realm).contains(element.type_name(), element.id())
    }

    fn add<T: RealmElement>(&mut self, element: T) -> CoreResult<()> {
        self.ensure_open()?;
        check_element_names(&element)?;
        if self.will_exist(&element)? {
            return Err(CoreError::validation(format!(
                "{} already exists",
                element.locator()
            )));
        }
        let key = key_of(&element);
        self.pending.push(Box::new(AddElementCommand::new(element)));
        self.pending_removes.remove(&key);
        self.pending_adds.insert(key);
        Ok(())
    }

    fn update<T: RealmElement>(&mut self, element: T) -> CoreResult<()> {
        self.ensure_open()?;
        if !self.will_exist(&element)? {
            return Err(CoreError::not_found(format!(
                "{} does not exist",
                element.locator()
            )));
        }
        self.pending.push(Box::new(UpdateElementCommand::new(element)));
        Ok(())
    }

    fn remove<T: RealmElement>(&mut self, element: T) -> CoreResult<()> {
        self.ensure_open()?;
        if !self.will_exist(&element)? {
            return Err(CoreError::not_found(format!(
                "{} does not exist",
                element.locator()
            )));
        }
        let key = key_of(&element);
        self.pending.push(Box::new(RemoveElementCommand::new(element)));
        self.pending_adds.remove(&key);
        self.pending_removes.insert(key);
        Ok(())
    }

    /// Registers adding `resource`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a resource with the same type and id
    /// exists or is already being added, or if its type or id is empty or
    /// contains `/`; the command is then not registered.
    pub fn add_resource(&mut self, resource: Resource) -> CoreResult<()> {
        self.add(resource)
    }

    /// Registers replacing `resource`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the resource does not exist.
    pub fn update_resource(&mut self, resource: Resource) -> CoreResult<()> {
        self.update(resource)
    }

    /// Registers removing `resource`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the resource does not exist.
    pub fn remove_resource(&mut self, resource: Resource) -> CoreResult<()> {
        self.remove(resource)
    }

    /// Registers adding `order`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the order exists or is already being
    /// added.
    pub fn add_order(&mut self, order: Order) -> CoreResult<()> {
        self.add(order)
    }

    /// Registers replacing `order`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the order does not exist.
    pub fn update_order(&mut self, order: Order) -> CoreResult<()> {
        self.update(order)
    }

    /// Registers removing `order`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the order does not exist.
    pub fn remove_order(&mut self, order: Order) -> CoreResult<()> {
        self.remove(order)
    }

    /// Registers adding `activity`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the activity exists or is already being
    /// added.
    pub fn add_activity(&mut self, activity: Activity) -> CoreResult<()> {
        self.add(activity)
    }

    /// Registers replacing `activity`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the activity does not exist.
    pub fn update_activity(&mut self, activity: Activity) -> CoreResult<()> {
        self.update(activity)
    }

    /// Registers removing `activity`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the activity does not exist.
    pub fn remove_activity(&mut self, activity: Activity) -> CoreResult<()> {
        self.remove(activity)
    }
}
