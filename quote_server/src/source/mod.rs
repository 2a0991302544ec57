//! Quote sources.
//!
//! A source is told which instruments to watch and pushes `SourceEvent`s into the
//! channel it was constructed with. Two variants exist:
//!
//! - `synthetic`: a random-walk generator running its own tick thread.
//! - `live`: an adapter over a vendor market-data gateway (`gateway`), with a
//!   connection state machine and queued watch-list replay.
//!
//! The engine holds exactly one of them as a [`Source`] for the whole process.

use std::collections::BTreeSet;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::warn;
use quote_common::{InstrumentId, Quote, Result, SourceMode};
use strum::{Display, EnumString};

pub mod gateway;
pub mod live;
pub mod sim_gateway;
pub mod synthetic;

pub use live::{LiveConfig, LiveSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Connection state of a live gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LinkState {
    /// No transport.
    Disconnected,
    /// Transport requested, waiting for the front to answer.
    Connecting,
    /// Front reachable, not logged in.
    Connected,
    /// Login sent, waiting for the response.
    Authenticating,
    /// Logged in; watch-list changes take effect.
    Ready,
}

/// Message a source pushes to the engine.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A new quote, stamped with the monotonic time it was produced.
    Quote {
        /// The quote itself.
        quote: Quote,
        /// When the source produced it.
        observed_at: Instant,
    },
    /// The live link moved to a new state.
    Link(LinkState),
}

impl SourceEvent {
    /// Wrap a freshly produced quote.
    pub fn quote(quote: Quote) -> Self {
        SourceEvent::Quote {
            quote,
            observed_at: Instant::now(),
        }
    }
}

/// Capability set every quote source offers.
pub trait QuoteSource {
    /// Variant this source represents.
    fn mode(&self) -> SourceMode;

    /// Begin emitting. Live sources block until `Ready` or fail.
    fn start(&mut self) -> Result<()>;

    /// Stop emitting and release upstream resources. Safe to call twice.
    fn stop(&mut self) -> Result<()>;

    /// Replace the watch list with `instruments`. Idempotent.
    fn set_watch_list(&mut self, instruments: &BTreeSet<InstrumentId>) -> Result<()>;

    /// Whether quotes are currently flowing.
    fn is_ready(&self) -> bool;
}

/// The single source variant bound to an engine.
pub enum Source {
    /// Vendor gateway adapter.
    Live(LiveSource),
    /// Random-walk generator.
    Synthetic(SyntheticSource),
}

impl QuoteSource for Source {
    fn mode(&self) -> SourceMode {
        match self {
            Source::Live(source) => source.mode(),
            Source::Synthetic(source) => source.mode(),
        }
    }

    fn start(&mut self) -> Result<()> {
        match self {
            Source::Live(source) => source.start(),
            Source::Synthetic(source) => source.start(),
        }
    }

    fn stop(&mut self) -> Result<()> {
        match self {
            Source::Live(source) => source.stop(),
            Source::Synthetic(source) => source.stop(),
        }
    }

    fn set_watch_list(&mut self, instruments: &BTreeSet<InstrumentId>) -> Result<()> {
        match self {
            Source::Live(source) => source.set_watch_list(instruments),
            Source::Synthetic(source) => source.set_watch_list(instruments),
        }
    }

    fn is_ready(&self) -> bool {
        match self {
            Source::Live(source) => source.is_ready(),
            Source::Synthetic(source) => source.is_ready(),
        }
    }
}

/// Wait up to `grace` for a worker to signal exit through `done_rx`, then join it.
///
/// A worker that outlives the grace period is left detached.
pub(crate) fn join_within(
    name: &str,
    handle: JoinHandle<()>,
    done_rx: &Receiver<()>,
    grace: Duration,
) {
    match done_rx.recv_timeout(grace) {
        Err(RecvTimeoutError::Timeout) => {
            warn!("{} did not stop within {:?}; detaching", name, grace);
        }
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if handle.join().is_err() {
                warn!("{} panicked while stopping", name);
            }
        }
    }
}
