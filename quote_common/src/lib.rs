//!
//! Common types and utilities shared by the quote server and client.
//!
//! This crate aggregates:
//! - `error`: unified error type `QuoteError` used across the workspace.
//! - `result`: handy `Result<T, QuoteError>` alias.
//! - `instrument`: validated `InstrumentId` tokens.
//! - `quote`: the `Quote` payload and its pricing math.
//! - `event`: push events (`quote`, `server_info`) streamed to clients.
//! - `command`: control requests/responses exchanged over TCP.
//! - `status`: source mode and health snapshot.
//! - `net`: networking constants and small helpers.
#![warn(missing_docs)]
pub mod command;
pub mod error;
pub mod event;
pub mod instrument;
pub mod net;
pub mod quote;
pub mod result;
pub mod status;

pub use command::{ControlRequest, ControlResponse};
pub use error::QuoteError;
pub use event::{ServerEvent, ServerInfo};
pub use instrument::InstrumentId;
pub use quote::Quote;
pub use result::Result;
pub use status::{HealthStatus, SourceMode};
