//! Net element changes of a transaction.

use crate::observer::ObserverEvent;
use realmstore_model::{AccessType, Audit, Element, ElementKind, Operation};
use std::collections::HashMap;

type Key = (ElementKind, String, String);

fn key_of(element: &Element) -> Key {
    (
        element.kind(),
        element.type_name().to_string(),
        element.id().to_string(),
    )
}

/// Collapses the changes commands make into one net operation per element.
///
/// | first  | then   | net    |
/// |--------|--------|--------|
/// | add    | modify | add    |
/// | add    | remove | none   |
/// | modify | modify | modify |
/// | modify | remove | remove |
/// | remove | add    | modify |
///
/// The recorded element is always the latest one. Elements keep the order in
/// which they were first touched.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    order: Vec<Key>,
    changes: HashMap<Key, (Operation, Element)>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one change.
    pub fn record(&mut self, operation: Operation, element: Element) {
        let key = key_of(&element);
        let Some((previous, _)) = self.changes.get(&key) else {
            self.order.push(key.clone());
            self.changes.insert(key, (operation, element));
            return;
        };

        let net = match (*previous, operation) {
            (Operation::Add, Operation::Remove) => None,
            (Operation::Add, _) => Some(Operation::Add),
            (Operation::Remove, Operation::Add) => Some(Operation::Modify),
            (_, latest) => Some(latest),
        };

        match net {
            Some(op) => {
                self.changes.insert(key, (op, element));
            }
            None => {
                self.changes.remove(&key);
                self.order.retain(|k| *k != key);
            }
        }
    }

    /// Returns the net operation recorded for an element.
    #[must_use]
    pub fn operation_of(&self, kind: ElementKind, type_name: &str, id: &str) -> Option<Operation> {
        self.changes
            .get(&(kind, type_name.to_string(), id.to_string()))
            .map(|(op, _)| *op)
    }

    /// Iterates over net changes in first-touch order.
    pub fn iter(&self) -> impl Iterator<Item = (Operation, &Element)> {
        self.order
            .iter()
            .filter_map(|k| self.changes.get(k))
            .map(|(op, e)| (*op, e))
    }

    /// Returns the number of elements with a net change.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forgets every change.
    pub fn clear(&mut self) {
        self.order.clear();
        self.changes.clear();
    }

    /// Builds the observer event for these changes.
    #[must_use]
    pub fn to_event(&self) -> ObserverEvent {
        let mut event = ObserverEvent::new();
        for (op, element) in self.iter() {
            match op {
                Operation::Add => event.add(element.clone()),
                Operation::Modify => event.update(element.clone()),
                Operation::Remove => event.remove(element.clone()),
            }
        }
        event
    }

    /// Builds one audit per net change.
    #[must_use]
    pub fn to_audits(&self, realm: &str, username: &str, action: &str) -> Vec<Audit> {
        self.iter()
            .map(|(op, element)| {
                let access = match op {
                    Operation::Add => AccessType::Create,
                    Operation::Modify => AccessType::Update,
                    Operation::Remove => AccessType::Delete,
                };
                Audit::new(
                    realm,
                    username,
                    element.kind().tag(),
                    element.type_name(),
                    element.id(),
                    access,
                    action,
                )
            })
            .collect()
    }
}
