//! Control protocol shared by client and server.
//!
//! A client opens a TCP connection to the command port, writes one JSON
//! `ControlRequest` and reads one JSON `ControlResponse` back. Requests are tagged
//! by a `command` field, responses by a `status` field.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::QuoteError;
use crate::instrument::InstrumentId;
use crate::quote::Quote;
use crate::status::HealthStatus;

/// Largest request or response body read from a control connection.
pub const MAX_MESSAGE: u64 = 1 << 20;

/// Request sent from a client to the control port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Add an instrument to the subscription registry.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// Raw id; trimmed and validated by the server.
        instrument_id: String,
    },
    /// Remove an instrument from the subscription registry.
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// Raw id; trimmed and validated by the server.
        instrument_id: String,
    },
    /// Sorted list of subscribed instruments.
    List,
    /// Source mode and readiness.
    Health,
    /// Cached last quotes, optionally restricted to some instruments.
    Quotes {
        /// Instruments to include; all cached quotes when empty.
        #[serde(default)]
        instruments: Vec<String>,
    },
    /// Open a push session towards the caller's IP on the given UDP port.
    Stream {
        /// UDP port the client listens on.
        port: u16,
    },
}

/// Reply written back on the control connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    /// Subscribe/unsubscribe accepted.
    #[serde(rename_all = "camelCase")]
    Ok {
        /// Normalized id the operation applied to.
        instrument_id: InstrumentId,
        /// Whether the registry changed.
        changed: bool,
    },
    /// Subscribed instruments in lexicographic order.
    Subscriptions {
        /// Sorted ids.
        instruments: Vec<InstrumentId>,
    },
    /// Health snapshot.
    Health(HealthStatus),
    /// Cached quotes.
    Quotes {
        /// Quotes sorted by instrument id.
        quotes: Vec<Quote>,
    },
    /// Push session opened.
    #[serde(rename_all = "camelCase")]
    Streaming {
        /// Server-side session id.
        session_id: u64,
    },
    /// Request rejected.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ControlResponse {
    /// Wrap an error as a response.
    pub fn error(err: &QuoteError) -> Self {
        ControlResponse::Error {
            message: err.to_string(),
        }
    }
}

/// Write `message` as JSON and close the write half of the exchange.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), QuoteError> {
    let bytes = serde_json::to_vec(message)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read one JSON document until the peer closes its write half.
pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(reader: R) -> Result<T, QuoteError> {
    let mut buf = Vec::new();
    reader.take(MAX_MESSAGE).read_to_end(&mut buf)?;
    if buf.is_empty() {
        return Err(QuoteError::Format("empty control message".to_string()));
    }
    Ok(serde_json::from_slice(&buf)?)
}
