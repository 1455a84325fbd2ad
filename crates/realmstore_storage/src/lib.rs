//! # realmstore Storage
//!
//! Persistence ports and adapters for realmstore.
//!
//! The engine never touches a storage format directly. It talks to:
//! - [`PersistencePort`] - one per element kind, for preload, fall-through
//!   reads and flushes
//! - [`LogMessagePort`] - for the operations log
//!
//! ## Available Adapters
//!
//! - [`InMemoryPersistence`] / [`InMemoryLogStore`] - for tests and demos
//! - [`FilePersistence`] - one JSON document per element kind
//!
//! ## Example
//!
//! ```rust
//! use realmstore_model::Resource;
//! use realmstore_storage::{InMemoryPersistence, PersistencePort};
//!
//! let port = InMemoryPersistence::<Resource>::new();
//! port.save(&Resource::new("A", "Item A", "Item")).unwrap();
//! assert_eq!(port.query_size(Some("Item")).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod port;

pub use error::{StorageError, StorageResult};
pub use file::FilePersistence;
pub use memory::{InMemoryLogStore, InMemoryPersistence};
pub use port::{LogMessagePort, Persistence, PersistencePort};
