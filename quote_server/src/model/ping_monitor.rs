//! Keep-alive tracker for streaming UDP clients.
//!
//! Every push session is registered under the client's UDP address when the stream
//! opens. Clients then send `PING` datagrams from that same address:
//!
//! - `PingMonitor::register(addr, session)`: start tracking a freshly opened session.
//! - `PingMonitor::update_ping(addr)`: record a fresh ping for a tracked client.
//! - `PingMonitor::check_timeouts()`: remove and return sessions whose last ping is
//!   older than the timeout.
//!
//! Time is measured with `std::time::Instant`. The monitor is not synchronized; the
//! server shares it behind a `Mutex`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::sessions::SessionId;

struct ClientConnection {
    session: SessionId,
    last_ping: Instant,
}

/// Tracks client keep-alive pings and reports sessions that went silent.
pub struct PingMonitor {
    clients: HashMap<SocketAddr, ClientConnection>,
    timeout: Duration,
}

impl PingMonitor {
    /// Create a monitor that expires clients silent for longer than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            timeout,
        }
    }

    /// Track `session` streaming to `addr`; the registration counts as a ping.
    ///
    /// Returns the session previously streaming to the same address, if any.
    pub fn register(&mut self, addr: SocketAddr, session: SessionId) -> Option<SessionId> {
        self.clients
            .insert(
                addr,
                ClientConnection {
                    session,
                    last_ping: Instant::now(),
                },
            )
            .map(|previous| previous.session)
    }

    /// Record a ping from `addr`. Returns `false` for unknown clients.
    pub fn update_ping(&mut self, addr: SocketAddr) -> bool {
        match self.clients.get_mut(&addr) {
            Some(conn) => {
                conn.last_ping = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Stop tracking `session` at `addr`. A newer session on the same address is kept.
    pub fn remove(&mut self, addr: &SocketAddr, session: SessionId) -> bool {
        match self.clients.get(addr) {
            Some(conn) if conn.session == session => {
                self.clients.remove(addr);
                true
            }
            _ => false,
        }
    }

    /// Remove and return every client whose last ping is older than the timeout.
    pub fn check_timeouts(&mut self) -> Vec<(SocketAddr, SessionId)> {
        let now = Instant::now();
        let timeout = self.timeout;
        let mut timed_out = Vec::new();

        self.clients.retain(|addr, conn| {
            if now.duration_since(conn.last_ping) > timeout {
                timed_out.push((*addr, conn.session));
                false
            } else {
                true
            }
        });
        timed_out
    }

    /// Whether `addr` is currently tracked.
    pub fn is_client_active(&self, addr: &SocketAddr) -> bool {
        self.clients.contains_key(addr)
    }
}
