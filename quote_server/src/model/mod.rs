//! Domain state owned by the quote server.
//!
//! - `registry`: the set of subscribed instruments.
//! - `cache`: last-known quote per instrument.
//! - `ping_monitor`: in-memory keep-alive tracker for streaming clients.

pub mod cache;
pub mod ping_monitor;
pub mod registry;
