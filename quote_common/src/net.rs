//! Shared networking constants and helpers used by client and server.

/// TCP port for the control channel (client -> server).
pub const COMMAND_PORT: u16 = 8080;
/// UDP port for push events and pings (server <-> client).
pub const DATA_PORT: u16 = 8081;
/// Keep-alive datagram sent by streaming clients.
pub const PING: &[u8] = b"PING";
/// Largest datagram either side expects to read.
pub const MAX_DATAGRAM: usize = 2048;

/// Helper to format an address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}
