//! CLI command implementations.

pub mod demo;
pub mod import;
pub mod inspect;
