//! Push events delivered to streaming clients.
//!
//! Each event travels as one JSON document of the shape
//! `{"event": "<name>", "data": {...}}`, where `<name>` is `quote` or
//! `server_info`.

use serde::{Deserialize, Serialize};

use crate::error::QuoteError;
use crate::quote::{Quote, now_millis};

/// Greeting sent once to every new client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Human-readable greeting.
    pub message: String,
    /// Registration time in milliseconds since the Unix epoch.
    pub connected_at: i64,
    /// Number of instruments subscribed at registration time.
    pub subscribed_count: usize,
}

impl ServerInfo {
    /// Greeting stamped with the current time.
    pub fn connected(subscribed_count: usize) -> Self {
        Self {
            message: "connected".to_string(),
            connected_at: now_millis(),
            subscribed_count,
        }
    }
}

/// Event pushed from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// One priced snapshot for an instrument.
    Quote(Quote),
    /// Connection greeting.
    ServerInfo(ServerInfo),
}

impl ServerEvent {
    /// Encode the event to JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, QuoteError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an event from JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, QuoteError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentId;

    #[test]
    fn quote_event_is_tagged() {
        let quote = Quote::from_move(InstrumentId::parse("rb2501").unwrap(), 3500.0, 3501.0);
        let value = serde_json::to_value(ServerEvent::Quote(quote)).unwrap();
        assert_eq!(value["event"], "quote");
        assert_eq!(value["data"]["instrumentId"], "rb2501");
    }

    #[test]
    fn server_info_is_tagged() {
        let bytes = ServerEvent::ServerInfo(ServerInfo::connected(2))
            .to_json_bytes()
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event"], "server_info");
        assert_eq!(value["data"]["message"], "connected");
        assert_eq!(value["data"]["subscribedCount"], 2);
        assert!(value["data"]["connectedAt"].is_i64());
    }
}
