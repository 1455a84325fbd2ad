//! # realmstore Testkit
//!
//! Test utilities for realmstore.
//!
//! This crate provides:
//! - Test agents with transient or file-backed realms
//! - Element builders and recording observers, commands and log ports
//! - Property-based test generators using proptest
//! - Stress testing utilities
//! - Cross-crate integration tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realmstore_testkit::prelude::*;
//!
//! #[test]
//! fn commit_is_visible() {
//!     let agent = TestAgent::transient();
//!     agent
//!         .realm()
//!         .transaction(alice(), "create", |tx| tx.add_resource(item("A")))
//!         .unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
