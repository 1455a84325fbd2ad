//! Credentials and the authorization port.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use realmstore_model::{Element, ElementKind, Locator, Operation, RootElement};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Who a transaction acts for.
///
/// Passed explicitly to every transaction; there is no ambient current user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    /// Authenticated user name.
    pub username: String,
    /// Session the credential belongs to.
    pub session_id: String,
}

impl Credential {
    /// Creates a credential with a fresh session id.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Credential used by the agent itself, for example during preload.
    pub fn system(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            session_id: format!("system:{name}"),
            username: name,
        }
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// What a privilege check is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementDescriptor {
    /// Element kind.
    pub kind: ElementKind,
    /// Element type.
    pub type_name: String,
    /// Element id.
    pub id: String,
}

impl ElementDescriptor {
    /// Describes a root element.
    pub fn of<T: RootElement>(element: &T) -> Self {
        Self {
            kind: T::KIND,
            type_name: element.type_name().to_string(),
            id: element.id().to_string(),
        }
    }

    /// Returns the element's locator.
    #[must_use]
    pub fn locator(&self) -> Locator {
        Locator::for_element(self.kind, &self.type_name, &self.id)
    }
}

impl From<&Element> for ElementDescriptor {
    fn from(element: &Element) -> Self {
        Self {
            kind: element.kind(),
            type_name: element.type_name().to_string(),
            id: element.id().to_string(),
        }
    }
}

/// The external authorization engine.
pub trait AuthorizationPort: Send + Sync {
    /// Checks that `credential` may perform `operation` on `element`.
    ///
    /// # Errors
    ///
    /// Returns an access-denied error if it may not.
    fn assert_has_privilege(
        &self,
        credential: &Credential,
        operation: Operation,
        element: &ElementDescriptor,
    ) -> CoreResult<()>;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthorizationPort for AllowAll {
    fn assert_has_privilege(
        &self,
        _credential: &Credential,
        _operation: Operation,
        _element: &ElementDescriptor,
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Per-user allow list of `(operation, kind)` pairs. Anything not granted is
/// denied.
#[derive(Debug, Default)]
pub struct PrivilegeTable {
    grants: RwLock<HashMap<String, HashSet<(Operation, ElementKind)>>>,
}

impl PrivilegeTable {
    /// Creates an empty table that denies everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows `username` to perform `operation` on elements of `kind`.
    pub fn grant(&self, username: impl Into<String>, operation: Operation, kind: ElementKind) {
        self.grants
            .write()
            .entry(username.into())
            .or_default()
            .insert((operation, kind));
    }

    /// Allows `username` every operation on every kind.
    pub fn grant_all(&self, username: impl Into<String>) {
        let username = username.into();
        for kind in ElementKind::ALL {
            for operation in [Operation::Add, Operation::Modify, Operation::Remove] {
                self.grant(username.clone(), operation, kind);
            }
        }
    }

    /// Withdraws a grant. Returns true if it existed.
    pub fn revoke(&self, username: &str, operation: Operation, kind: ElementKind) -> bool {
        self.grants
            .write()
            .get_mut(username)
            .is_some_and(|g| g.remove(&(operation, kind)))
    }
}

impl AuthorizationPort for PrivilegeTable {
    fn assert_has_privilege(
        &self,
        credential: &Credential,
        operation: Operation,
        element: &ElementDescriptor,
    ) -> CoreResult<()> {
        let allowed = self
            .grants
            .read()
            .get(&credential.username)
            .is_some_and(|g| g.contains(&(operation, element.kind)));
        if allowed {
            Ok(())
        } else {
            Err(CoreError::access_denied(
                credential.username.clone(),
                operation,
                element.locator(),
            ))
        }
    }
}
