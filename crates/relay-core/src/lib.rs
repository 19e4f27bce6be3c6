//! # relay-core
//!
//! Transport-free domain types for the event relay.
//!
//! - [`Event`]: an externally supplied, already-validated JSON value
//! - Canonical serialization: the single textual form every subscriber
//!   receives for one event

#![deny(unsafe_code)]

pub mod event;

pub use event::{Event, EventError};
