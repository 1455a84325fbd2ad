//! Per-realm audit trail.

use parking_lot::RwLock;
use realmstore_model::{AccessType, Audit};
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only record of element accesses in one realm.
///
/// Recorded audits are never modified. A disabled trail silently drops
/// everything it is given.
#[derive(Debug)]
pub struct AuditTrail {
    realm: String,
    enabled: bool,
    audits: RwLock<Vec<Audit>>,
    next_id: AtomicU64,
}

impl AuditTrail {
    /// Creates an empty trail.
    pub fn new(realm: impl Into<String>, enabled: bool) -> Self {
        Self {
            realm: realm.into(),
            enabled,
            audits: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns true if audits are recorded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records one audit, assigning its id. Returns the id, or `None` if
    /// the trail is disabled.
    pub fn add(&self, mut audit: Audit) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        audit.id = id;
        self.audits.write().push(audit);
        Some(id)
    }

    /// Records several audits in one step.
    pub fn add_all(&self, audits: impl IntoIterator<Item = Audit>) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut stored = self.audits.write();
        let before = stored.len();
        for mut audit in audits {
            audit.id = self.next_id.fetch_add(1, Ordering::Relaxed);
            stored.push(audit);
        }
        let added = stored.len() - before;
        if added > 0 {
            tracing::debug!(realm = %self.realm, added, "audits recorded");
        }
        added
    }

    /// Returns audits, optionally restricted to one element kind tag, in
    /// recording order.
    #[must_use]
    pub fn query(&self, element_type: Option<&str>) -> Vec<Audit> {
        self.audits
            .read()
            .iter()
            .filter(|a| element_type.map_or(true, |t| a.element_type == t))
            .cloned()
            .collect()
    }

    /// Returns the audits of one element.
    #[must_use]
    pub fn for_element(&self, element_type: &str, sub_type: &str, id: &str) -> Vec<Audit> {
        self.audits
            .read()
            .iter()
            .filter(|a| {
                a.element_type == element_type && a.element_sub_type == sub_type && a.element_id == id
            })
            .cloned()
            .collect()
    }

    /// Counts audits of one access type.
    #[must_use]
    pub fn count(&self, access_type: AccessType) -> usize {
        self.audits
            .read()
            .iter()
            .filter(|a| a.access_type == access_type)
            .count()
    }

    /// Returns the number of recorded audits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.audits.read().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
