//! Client session registry and fan-out.
//!
//! Each session owns a bounded `crossbeam_channel` queue. Broadcasting never blocks:
//! events are offered with `try_send`, and a session whose queue is full (a client
//! that cannot keep up) or whose receiver is gone is unregistered on the spot. The
//! rest of the sessions see no difference.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{info, warn};
use quote_common::{QuoteError, Result, ServerEvent};

/// Identifier of a registered session.
pub type SessionId = u64;

/// Settings for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Events a session may have queued before it is dropped.
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Receiving end handed to the transport that serves a session.
#[derive(Debug)]
pub struct SessionHandle {
    /// Session id, used to unregister.
    pub id: SessionId,
    /// Events to deliver, in order.
    pub events: Receiver<ServerEvent>,
}

/// Tracks connected client channels and performs the fan-out write.
#[derive(Debug)]
pub struct ClientSessionManager {
    sessions: Mutex<HashMap<SessionId, Sender<ServerEvent>>>,
    next_id: AtomicU64,
    config: SessionConfig,
}

impl ClientSessionManager {
    /// Create an empty manager.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Register a session whose queue starts with the events produced by `burst`.
    ///
    /// `burst` runs while the session table is locked, so no broadcast can slip in
    /// between the snapshot it takes and the session becoming visible.
    pub fn register<F>(&self, burst: F) -> Result<SessionHandle>
    where
        F: FnOnce() -> Result<Vec<ServerEvent>>,
    {
        let mut sessions = self.sessions.lock()?;
        let initial = burst()?;
        let (tx, rx) = crossbeam_channel::bounded(self.config.queue_capacity + initial.len());
        for event in initial {
            tx.try_send(event)
                .map_err(|e| QuoteError::ChannelSend(e.to_string()))?;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        sessions.insert(id, tx);
        info!("Session {} registered. Total sessions: {}", id, sessions.len());
        Ok(SessionHandle { id, events: rx })
    }

    /// Unregister `id`. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SessionId) -> Result<bool> {
        let removed = self.sessions.lock()?.remove(&id).is_some();
        if removed {
            info!("Session {} unregistered", id);
        }
        Ok(removed)
    }

    /// Offer `event` to every session. Returns the number of sessions that took it.
    pub fn broadcast(&self, event: &ServerEvent) -> Result<usize> {
        self.broadcast_if(event, || Ok(true))
    }

    /// Offer `event` to every session if `admit` agrees.
    ///
    /// `admit` runs under the session table lock, which makes the admission
    /// decision and the fan-out atomic with respect to `register`.
    pub fn broadcast_if<F>(&self, event: &ServerEvent, admit: F) -> Result<usize>
    where
        F: FnOnce() -> Result<bool>,
    {
        let mut sessions = self.sessions.lock()?;
        if !admit()? {
            return Ok(0);
        }

        let mut delivered = 0;
        sessions.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                let err = QuoteError::TransportDropped(format!(
                    "session {} exceeded {} queued events",
                    id, self.config.queue_capacity
                ));
                warn!("Dropping slow session: {}", err);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                info!("Session {} disconnected", id);
                false
            }
        });
        Ok(delivered)
    }

    /// Unregister every session; their receivers drain and then disconnect.
    pub fn close_all(&self) -> Result<()> {
        let mut sessions = self.sessions.lock()?;
        if !sessions.is_empty() {
            info!("Closing {} sessions", sessions.len());
        }
        sessions.clear();
        Ok(())
    }

    /// Number of registered sessions.
    pub fn len(&self) -> Result<usize> {
        Ok(self.sessions.lock()?.len())
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
