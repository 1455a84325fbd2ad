//! Access audit records.

use serde::{Deserialize, Serialize};

/// What kind of access an [`Audit`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    /// The element was read.
    Read,
    /// The element was created.
    Create,
    /// The element was updated.
    Update,
    /// The element was deleted.
    Delete,
}

/// An immutable record of one access to an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    /// Sequence id assigned by the audit trail; 0 until recorded.
    pub id: u64,
    /// Realm the access happened in.
    pub realm: String,
    /// User that performed the access.
    pub username: String,
    /// Element kind tag, or `Audit` for audit queries.
    pub element_type: String,
    /// Element type.
    pub element_sub_type: String,
    /// Element id.
    pub element_id: String,
    /// Access kind.
    pub access_type: AccessType,
    /// Action label of the transaction.
    pub action: String,
    /// Time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl Audit {
    /// Creates an audit stamped with the current time.
    pub fn new(
        realm: impl Into<String>,
        username: impl Into<String>,
        element_type: impl Into<String>,
        element_sub_type: impl Into<String>,
        element_id: impl Into<String>,
        access_type: AccessType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            realm: realm.into(),
            username: username.into(),
            element_type: element_type.into(),
            element_sub_type: element_sub_type.into(),
            element_id: element_id.into(),
            access_type,
            action: action.into(),
            timestamp_ms: crate::now_millis(),
        }
    }
}
