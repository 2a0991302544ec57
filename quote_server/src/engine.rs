//! The distribution engine.
//!
//! `DistributionEngine` binds one quote source for the life of the process, keeps its
//! watch list in step with the subscription registry, and runs a dispatcher thread
//! that moves quotes from the source into the cache and out to every session.
//!
//! Locks, always taken in this order when nested:
//!
//! 1. `source`: serializes control operations against the source.
//! 2. `sessions` (inside `ClientSessionManager`): held while a session registers or a
//!    quote is fanned out.
//! 3. `state`: registry, cache and link health; only ever held briefly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, select};
use log::{debug, error, info, warn};
use quote_common::{
    HealthStatus, InstrumentId, Quote, QuoteError, Result, ServerEvent, ServerInfo, SourceMode,
};

use crate::model::cache::QuoteCache;
use crate::model::registry::SubscriptionRegistry;
use crate::sessions::{ClientSessionManager, SessionConfig, SessionHandle, SessionId};
use crate::source::gateway::MarketGateway;
use crate::source::{
    LinkState, LiveConfig, LiveSource, QuoteSource, Source, SourceEvent, SyntheticConfig,
    SyntheticSource, join_within,
};

const DISPATCHER_GRACE: Duration = Duration::from_secs(1);

/// Everything needed to start an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Source variant to try first.
    pub preferred: SourceMode,
    /// Live settings; `None` means the live source is not configured.
    pub live: Option<LiveConfig>,
    /// Synthetic generator settings, also used for the fallback.
    pub synthetic: SyntheticConfig,
    /// Push session settings.
    pub sessions: SessionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preferred: SourceMode::Synthetic,
            live: None,
            synthetic: SyntheticConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

/// Outcome of a subscribe or unsubscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryChange {
    /// Normalized instrument id.
    pub instrument_id: InstrumentId,
    /// Whether the registry changed.
    pub changed: bool,
}

#[derive(Debug, Default)]
struct EngineState {
    registry: SubscriptionRegistry,
    cache: QuoteCache,
    reached_ready: bool,
    degraded: bool,
}

impl EngineState {
    /// Cache `quote` if its instrument is subscribed and it was observed after the
    /// subscription began. Returns whether it should be broadcast.
    fn accept(&mut self, quote: &Quote, observed_at: Instant) -> bool {
        match self.registry.subscribed_at(&quote.instrument_id) {
            Some(since) if observed_at >= since => {
                self.cache.update(quote.clone());
                true
            }
            _ => false,
        }
    }

    fn on_link(&mut self, link: LinkState) {
        if link == LinkState::Ready {
            if self.degraded {
                info!("Live source is ready again");
            }
            self.reached_ready = true;
            self.degraded = false;
        } else if self.reached_ready && !self.degraded {
            warn!("Live source lost its link ({}); marking degraded", link);
            self.degraded = true;
        }
    }
}

struct Dispatcher {
    shutdown: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Owns the quote source, the registry and cache, and the push sessions.
pub struct DistributionEngine {
    mode: SourceMode,
    source: Mutex<Source>,
    state: Arc<Mutex<EngineState>>,
    sessions: Arc<ClientSessionManager>,
    dispatcher: Mutex<Option<Dispatcher>>,
    stopped: AtomicBool,
}

impl DistributionEngine {
    /// Bind a source and start dispatching.
    ///
    /// With `preferred` set to live, the live source is used if it is configured, a
    /// gateway is supplied and the link reaches `Ready`. Any failure along that path is
    /// logged and the engine runs on the synthetic source for the rest of its life.
    pub fn start(config: EngineConfig, gateway: Option<Box<dyn MarketGateway>>) -> Result<Self> {
        let (events_tx, events_rx) = crossbeam_channel::unbounded::<SourceEvent>();
        let source = bind_source(&config, gateway, events_tx)?;
        let mode = source.mode();

        let state = Arc::new(Mutex::new(EngineState::default()));
        let sessions = Arc::new(ClientSessionManager::new(config.sessions.clone()));
        let dispatcher = spawn_dispatcher(
            mode,
            events_rx,
            Arc::clone(&state),
            Arc::clone(&sessions),
        )?;

        info!("Distribution engine started with {} source", mode);
        Ok(Self {
            mode,
            source: Mutex::new(source),
            state,
            sessions,
            dispatcher: Mutex::new(Some(dispatcher)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Source variant bound at startup.
    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    /// Add `raw` to the registry and, on change, push the new watch list to the source.
    pub fn subscribe(&self, raw: &str) -> Result<RegistryChange> {
        self.ensure_running()?;
        let mut source = self.source.lock()?;
        let instrument_id = InstrumentId::parse(raw)?;
        let (changed, watch) = {
            let mut state = self.state.lock()?;
            let changed = state.registry.add(raw)?;
            (changed, state.registry.watch_set())
        };

        if changed {
            if let Err(e) = source.set_watch_list(&watch) {
                error!("Watch list update for {} failed: {}", instrument_id, e);
                self.state.lock()?.registry.remove(raw)?;
                return Err(e);
            }
            info!(
                "Subscribed {} ({} instruments)",
                instrument_id,
                watch.len()
            );
        }
        Ok(RegistryChange {
            instrument_id,
            changed,
        })
    }

    /// Remove `raw` from the registry, evict its cached quote and, on change, push the
    /// new watch list to the source.
    ///
    /// The registry change stands even if the source rejects the new watch list; quotes
    /// for the instrument are discarded by the dispatcher either way.
    pub fn unsubscribe(&self, raw: &str) -> Result<RegistryChange> {
        self.ensure_running()?;
        let mut source = self.source.lock()?;
        let instrument_id = InstrumentId::parse(raw)?;
        let (changed, watch) = {
            let mut state = self.state.lock()?;
            let changed = state.registry.remove(raw)?;
            if changed {
                state.cache.evict(&instrument_id);
            }
            (changed, state.registry.watch_set())
        };

        if changed {
            source.set_watch_list(&watch)?;
            info!(
                "Unsubscribed {} ({} instruments)",
                instrument_id,
                watch.len()
            );
        }
        Ok(RegistryChange {
            instrument_id,
            changed,
        })
    }

    /// Subscribed ids in lexicographic order.
    pub fn subscriptions(&self) -> Result<Vec<InstrumentId>> {
        Ok(self.state.lock()?.registry.snapshot())
    }

    /// Current status.
    pub fn health(&self) -> Result<HealthStatus> {
        let ready = !self.stopped.load(Ordering::SeqCst) && self.source.lock()?.is_ready();
        let (subscribed_count, degraded) = {
            let state = self.state.lock()?;
            (state.registry.len(), state.degraded)
        };
        Ok(HealthStatus {
            source_mode: self.mode,
            ready,
            subscribed_count,
            degraded,
            session_count: self.sessions.len()?,
        })
    }

    /// Cached quotes for `instruments`, or for every subscribed instrument when empty.
    pub fn quotes(&self, instruments: &[String]) -> Result<Vec<Quote>> {
        let ids = instruments
            .iter()
            .map(|raw| InstrumentId::parse(raw))
            .collect::<Result<Vec<_>>>()?;
        let state = self.state.lock()?;
        if ids.is_empty() {
            return Ok(state.cache.snapshot_for(&state.registry));
        }
        Ok(ids
            .iter()
            .filter_map(|id| state.cache.get(id).cloned())
            .collect())
    }

    /// Last cached quote for `raw`.
    pub fn last_quote(&self, raw: &str) -> Result<Option<Quote>> {
        let id = InstrumentId::parse(raw)?;
        Ok(self.state.lock()?.cache.get(&id).cloned())
    }

    /// Register a push session. Its queue opens with a `server_info` greeting followed
    /// by one cached quote per subscribed instrument.
    pub fn connect_client(&self) -> Result<SessionHandle> {
        self.ensure_running()?;
        let state = Arc::clone(&self.state);
        self.sessions.register(move || {
            let state = state.lock()?;
            let mut burst = vec![ServerEvent::ServerInfo(ServerInfo::connected(
                state.registry.len(),
            ))];
            burst.extend(
                state
                    .cache
                    .snapshot_for(&state.registry)
                    .into_iter()
                    .map(ServerEvent::Quote),
            );
            Ok(burst)
        })
    }

    /// Unregister a push session. Returns `false` if it was already gone.
    pub fn disconnect_client(&self, id: SessionId) -> Result<bool> {
        self.sessions.unregister(id)
    }

    /// Stop the source and the dispatcher and close every session. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping distribution engine");
        // The dispatcher goes first so the link teardown below never reaches the
        // engine state.
        if let Some(dispatcher) = self.dispatcher.lock()?.take() {
            let _ = dispatcher.shutdown.try_send(());
            join_within(
                "dispatcher",
                dispatcher.handle,
                &dispatcher.done_rx,
                DISPATCHER_GRACE,
            );
        }
        self.source.lock()?.stop()?;
        self.sessions.close_all()?;
        info!("Distribution engine stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(QuoteError::NotReady("engine is stopped".to_string()));
        }
        Ok(())
    }
}

impl Drop for DistributionEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Error while stopping engine: {}", e);
        }
    }
}

fn bind_source(
    config: &EngineConfig,
    gateway: Option<Box<dyn MarketGateway>>,
    events: Sender<SourceEvent>,
) -> Result<Source> {
    if config.preferred == SourceMode::Live {
        match (&config.live, gateway) {
            (Some(live), Some(gateway)) => {
                let mut source = LiveSource::new(live.clone(), gateway, events.clone());
                match source.start() {
                    Ok(()) => return Ok(Source::Live(source)),
                    Err(e) => error!("Live source failed to start, using synthetic: {}", e),
                }
            }
            (None, _) => warn!("Live source is not configured, using synthetic"),
            (Some(_), None) => warn!("No market gateway available, using synthetic"),
        }
    }

    let mut source = SyntheticSource::new(config.synthetic.clone(), events);
    source.start()?;
    Ok(Source::Synthetic(source))
}

fn spawn_dispatcher(
    mode: SourceMode,
    events: Receiver<SourceEvent>,
    state: Arc<Mutex<EngineState>>,
    sessions: Arc<ClientSessionManager>,
) -> Result<Dispatcher> {
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let handle = thread::Builder::new()
        .name("dispatcher".to_string())
        .spawn(move || {
            let _done = done_tx;
            run_dispatcher(mode, events, shutdown_rx, state, sessions);
        })?;
    Ok(Dispatcher {
        shutdown: shutdown_tx,
        done_rx,
        handle,
    })
}

fn run_dispatcher(
    mode: SourceMode,
    events: Receiver<SourceEvent>,
    shutdown: Receiver<()>,
    state: Arc<Mutex<EngineState>>,
    sessions: Arc<ClientSessionManager>,
) {
    info!("Dispatcher started");
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(SourceEvent::Quote { quote, observed_at }) => {
                    if let Err(e) = dispatch(&state, &sessions, quote, observed_at) {
                        error!("Dispatch failed: {}", e);
                        break;
                    }
                }
                Ok(SourceEvent::Link(link)) if mode == SourceMode::Live => match state.lock() {
                    Ok(mut state) => state.on_link(link),
                    Err(e) => {
                        error!("Engine state lock poisoned: {}", e);
                        break;
                    }
                },
                Ok(SourceEvent::Link(link)) => debug!("Ignoring link state {} in {} mode", link, mode),
                Err(_) => {
                    info!("Source event channel closed");
                    break;
                }
            },
            recv(shutdown) -> _ => break,
        }
    }
    info!("Dispatcher stopped");
}

fn dispatch(
    state: &Mutex<EngineState>,
    sessions: &ClientSessionManager,
    quote: Quote,
    observed_at: Instant,
) -> Result<()> {
    let event = ServerEvent::Quote(quote.clone());
    let delivered =
        sessions.broadcast_if(&event, || Ok(state.lock()?.accept(&quote, observed_at)))?;
    debug!(
        "{} {:.2} -> {} sessions",
        quote.instrument_id, quote.last_price, delivered
    );
    Ok(())
}
