//! # realmstore Model
//!
//! Domain model shared by every realmstore crate.
//!
//! This crate provides:
//! - The three root element kinds: [`Resource`], [`Order`] and [`Activity`]
//! - Attribute groups ([`ParameterBag`]) and typed [`Parameter`] values
//! - [`Locator`] paths used as lock keys and log index keys
//! - [`LogMessage`] and [`Audit`] records
//!
//! The set of element kinds is closed. Generic code works through the
//! [`RootElement`] trait, heterogeneous collections through [`Element`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod element;
mod error;
mod locator;
mod log;
mod parameter;

pub use audit::{AccessType, Audit};
pub use element::{
    Action, Activity, Element, ElementKind, Operation, Order, Resource, RootElement, State,
    TEMPLATE,
};
pub use error::{ModelError, ModelResult};
pub use locator::Locator;
pub use log::{LogMessage, LogSeverity};
pub use parameter::{
    Parameter, ParameterBag, ParameterValue, INTERPRETATION_ACTIVITY_REF, INTERPRETATION_NONE,
    INTERPRETATION_ORDER_REF, INTERPRETATION_RESOURCE_REF, UOM_NONE,
};

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
