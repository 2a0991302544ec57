//! Error types shared between client and server.
//!
//! The `QuoteError` enum carries the domain failures of the distribution engine
//! (invalid instrument ids, a live source that is not ready or unavailable, a
//! dropped client transport) next to the plumbing failures of I/O, serialization,
//! channel communication and lock poisoning, so every crate propagates one type.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by client and server.
#[derive(Error, Debug)]
pub enum QuoteError {
    /// Empty or malformed instrument id.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a live source outside the `Ready` state.
    #[error("Source not ready: {0}")]
    NotReady(String),

    /// Live source failed to connect or authenticate at startup.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// A client channel failed or fell behind during broadcast.
    #[error("Transport dropped: {0}")]
    TransportDropped(String),

    /// I/O error originating from the standard library or sockets.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// Invalid or incomplete configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Crossbeam/channel send failed (e.g., receiver dropped); contains a short context string.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Crossbeam/channel receive failed (e.g., sender closed); contains a short context string.
    #[error("Channel receive failed: {0}")]
    ChannelRecv(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),
}

impl<T> From<PoisonError<T>> for QuoteError {
    fn from(err: PoisonError<T>) -> Self {
        QuoteError::MutexLock(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn poisoned_lock_converts_to_mutex_error() {
        let lock = Arc::new(Mutex::new(0u8));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        let err: QuoteError = lock.lock().unwrap_err().into();
        assert!(matches!(err, QuoteError::MutexLock(_)));
    }

    #[test]
    fn domain_errors_render_their_context() {
        let err = QuoteError::InvalidArgument("instrumentId is required".into());
        assert_eq!(err.to_string(), "Invalid argument: instrumentId is required");
    }
}
