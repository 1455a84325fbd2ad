//! # realmstore Core
//!
//! Transaction and cache coordination engine for realmstore.
//!
//! This crate provides:
//! - [`Agent`], the container of named [`Realm`]s
//! - Per-kind [`ElementMap`]s in transient, cached or transactional mode
//! - [`Transaction`]s running undoable [`Command`]s with reverse undo on failure
//! - A per-realm [`LockTable`] keyed by [`Locator`](realmstore_model::Locator)
//! - Asynchronous per-tag delivery of committed changes via [`ObserverRegistry`]
//! - An [`AuditTrail`] per realm and a bounded, shared [`OperationsLog`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use realmstore_core::{Credential, Realm};
//! use realmstore_model::Resource;
//!
//! let realm = Realm::transient("defaultRealm")?;
//! realm.transaction(Credential::new("alice"), "create", |tx| {
//!     tx.add_resource(Resource::new("m1", "Machine 1", "Machine"))
//! })?;
//!
//! let mut tx = realm.open_tx(Credential::new("alice"), "read");
//! let machine = tx.get_resource_by_or_fail("Machine", "m1")?;
//! tx.close()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod audit;
mod change_set;
mod command;
mod config;
mod element_map;
mod error;
mod lock;
mod observer;
mod operations_log;
mod privilege;
mod realm;
mod stats;
mod transaction;
mod types;

pub use agent::{Agent, AgentBuilder};
pub use audit::AuditTrail;
pub use change_set::ChangeSet;
pub use command::{
    check_element_names, AddElementCommand, Command, CommandContext, RealmElement,
    RemoveElementCommand, UpdateElementCommand,
};
pub use config::{AgentConfig, DataStoreMode, RealmConfig};
pub use element_map::ElementMap;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use lock::LockTable;
pub use observer::{Observer, ObserverError, ObserverEvent, ObserverRegistry};
pub use operations_log::{prune_count, OperationsLog};
pub use privilege::{AllowAll, AuthorizationPort, Credential, ElementDescriptor, PrivilegeTable};
pub use realm::{Realm, RealmContext};
pub use stats::{RealmStats, StatsSnapshot};
pub use transaction::{FoundElement, Transaction, TransactionResult};
pub use types::{CloseStrategy, TransactionId, TransactionState};

/// Version of the engine crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
