//! Live quote source over a vendor market-data gateway.
//!
//! The gateway session lives on a dedicated worker thread that multiplexes two inputs
//! with `crossbeam_channel::select!`: commands from the engine (watch-list updates,
//! stop) and asynchronous gateway events. The worker drives the link through
//! `Disconnected → Connecting → Connected → Authenticating → Ready`; a transport drop
//! returns it to `Disconnected`, and a later `FrontConnected` logs in again.
//!
//! Watch-list updates received outside `Ready` are kept as the desired set and
//! replayed against the gateway once `Ready` is reached. The gateway is released when
//! the worker exits, whatever the reason.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select};
use log::{debug, error, info, warn};
use quote_common::{InstrumentId, QuoteError, Result, SourceMode};

use super::gateway::{Credentials, GatewayEvent, MarketGateway};
use super::{LinkState, QuoteSource, SourceEvent, join_within};

/// Settings for the live source.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Gateway front, e.g. `tcp://180.168.146.187:10131`.
    pub front_address: String,
    /// Login material.
    pub credentials: Credentials,
    /// How long `start` waits for `Ready`.
    pub ready_timeout: Duration,
    /// How long `stop` waits for the worker.
    pub stop_grace: Duration,
}

enum LinkCommand {
    Watch(BTreeSet<InstrumentId>),
    Stop,
}

enum Startup {
    Reached(LinkState),
    Failed(String),
}

struct LinkWorker {
    commands: Sender<LinkCommand>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Quote source adapting a [`MarketGateway`].
pub struct LiveSource {
    config: LiveConfig,
    gateway: Option<Box<dyn MarketGateway>>,
    events: Sender<SourceEvent>,
    state: Arc<Mutex<LinkState>>,
    worker: Option<LinkWorker>,
}

impl LiveSource {
    /// Create a stopped source that will push into `events`.
    pub fn new(
        config: LiveConfig,
        gateway: Box<dyn MarketGateway>,
        events: Sender<SourceEvent>,
    ) -> Self {
        Self {
            config,
            gateway: Some(gateway),
            events,
            state: Arc::new(Mutex::new(LinkState::Disconnected)),
            worker: None,
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(LinkState::Disconnected)
    }

    /// Like `set_watch_list`, but fails with `NotReady` instead of queueing.
    pub fn set_watch_list_confirmed(&mut self, instruments: &BTreeSet<InstrumentId>) -> Result<()> {
        let state = self.state();
        if state != LinkState::Ready {
            return Err(QuoteError::NotReady(format!("gateway link is {}", state)));
        }
        self.set_watch_list(instruments)
    }

    fn await_ready(&mut self, startup_rx: Receiver<Startup>) -> Result<()> {
        let deadline = Instant::now() + self.config.ready_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let failure = match startup_rx.recv_timeout(remaining) {
                Ok(Startup::Reached(LinkState::Ready)) => return Ok(()),
                Ok(Startup::Reached(state)) => {
                    debug!("Gateway link is {}", state);
                    continue;
                }
                Ok(Startup::Failed(reason)) => reason,
                Err(RecvTimeoutError::Timeout) => format!(
                    "gateway not ready within {:?} (link is {})",
                    self.config.ready_timeout,
                    self.state()
                ),
                Err(RecvTimeoutError::Disconnected) => "gateway worker exited".to_string(),
            };
            self.stop()?;
            return Err(QuoteError::SourceUnavailable(failure));
        }
    }
}

impl QuoteSource for LiveSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Live
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let gateway = self.gateway.take().ok_or_else(|| {
            QuoteError::SourceUnavailable("gateway session already used".to_string())
        })?;

        let (command_tx, command_rx) = crossbeam_channel::unbounded::<LinkCommand>();
        let (startup_tx, startup_rx) = crossbeam_channel::unbounded::<Startup>();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let front = self.config.front_address.clone();
        let driver = LinkDriver {
            gateway,
            credentials: self.config.credentials.clone(),
            shared_state: Arc::clone(&self.state),
            link: LinkState::Disconnected,
            events: self.events.clone(),
            startup: startup_tx,
            desired: BTreeSet::new(),
            active: BTreeSet::new(),
        };

        info!("Connecting to gateway front {}", front);
        let handle = thread::Builder::new()
            .name("gateway-link".to_string())
            .spawn(move || {
                let _done = done_tx;
                driver.run(&front, command_rx);
            })?;

        self.worker = Some(LinkWorker {
            commands: command_tx,
            done_rx,
            handle,
        });
        self.await_ready(startup_rx)
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(LinkCommand::Stop);
            join_within(
                "gateway link",
                worker.handle,
                &worker.done_rx,
                self.config.stop_grace,
            );
            *self.state.lock()? = LinkState::Disconnected;
        }
        Ok(())
    }

    fn set_watch_list(&mut self, instruments: &BTreeSet<InstrumentId>) -> Result<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| QuoteError::NotReady("live source is not running".to_string()))?;
        worker
            .commands
            .send(LinkCommand::Watch(instruments.clone()))
            .map_err(|e| QuoteError::ChannelSend(e.to_string()))
    }

    fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Worker-side state; dropping it releases the gateway.
struct LinkDriver {
    gateway: Box<dyn MarketGateway>,
    credentials: Credentials,
    shared_state: Arc<Mutex<LinkState>>,
    link: LinkState,
    events: Sender<SourceEvent>,
    startup: Sender<Startup>,
    desired: BTreeSet<InstrumentId>,
    active: BTreeSet<InstrumentId>,
}

impl LinkDriver {
    fn run(mut self, front: &str, commands: Receiver<LinkCommand>) {
        let (gateway_tx, gateway_rx) = crossbeam_channel::unbounded::<GatewayEvent>();
        let closed = crossbeam_channel::never::<GatewayEvent>();
        let mut gateway_open = true;
        self.publish(LinkState::Connecting);
        if let Err(e) = self.gateway.register_front(front, gateway_tx) {
            error!("Failed to register gateway front {}: {}", front, e);
            let _ = self.startup.send(Startup::Failed(e.to_string()));
            return;
        }

        loop {
            let gateway = if gateway_open { &gateway_rx } else { &closed };
            select! {
                recv(commands) -> command => match command {
                    Ok(LinkCommand::Watch(instruments)) => self.watch(instruments),
                    Ok(LinkCommand::Stop) | Err(_) => break,
                },
                recv(gateway) -> event => match event {
                    Ok(event) => self.on_gateway_event(event),
                    Err(_) => {
                        warn!("Gateway event stream closed");
                        self.active.clear();
                        self.publish(LinkState::Disconnected);
                        gateway_open = false;
                    }
                },
            }
        }
        info!("Gateway link stopping");
    }

    fn watch(&mut self, instruments: BTreeSet<InstrumentId>) {
        self.desired = instruments;
        if self.link == LinkState::Ready {
            self.reconcile();
        } else {
            debug!(
                "Gateway link is {}; queued watch list {:?}",
                self.link, self.desired
            );
        }
    }

    fn on_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::FrontConnected => {
                info!("Gateway front connected");
                self.publish(LinkState::Connected);
                match self.gateway.login(&self.credentials) {
                    Ok(()) => self.publish(LinkState::Authenticating),
                    Err(e) => {
                        error!("Gateway login request failed: {}", e);
                        let _ = self.startup.send(Startup::Failed(e.to_string()));
                    }
                }
            }
            GatewayEvent::FrontDisconnected { reason } => {
                warn!("Gateway front disconnected, reason: {}", reason);
                self.active.clear();
                self.publish(LinkState::Disconnected);
            }
            GatewayEvent::LoginResponse { error: None } => {
                info!("Gateway login successful");
                self.publish(LinkState::Ready);
                self.active.clear();
                self.reconcile();
            }
            GatewayEvent::LoginResponse { error: Some(message) } => {
                error!("Gateway login failed: {}", message);
                self.publish(LinkState::Connected);
                let _ = self
                    .startup
                    .send(Startup::Failed(format!("login failed: {}", message)));
            }
            GatewayEvent::SubscribeResponse {
                instrument_id,
                error,
            } => match error {
                Some(message) => warn!("Subscribe {} failed: {}", instrument_id, message),
                None => debug!("Subscribed {}", instrument_id),
            },
            GatewayEvent::UnsubscribeResponse {
                instrument_id,
                error,
            } => match error {
                Some(message) => warn!("Unsubscribe {} failed: {}", instrument_id, message),
                None => debug!("Unsubscribed {}", instrument_id),
            },
            GatewayEvent::DepthMarketData(data) => {
                let Some(quote) = data.to_quote() else {
                    debug!("Discarding tick without instrument");
                    return;
                };
                if !self.desired.contains(&quote.instrument_id) {
                    return;
                }
                if self.events.send(SourceEvent::quote(quote)).is_err() {
                    debug!("Quote receiver closed; dropping gateway tick");
                }
            }
        }
    }

    fn reconcile(&mut self) {
        let to_remove: Vec<InstrumentId> =
            self.active.difference(&self.desired).cloned().collect();
        let to_add: Vec<InstrumentId> = self.desired.difference(&self.active).cloned().collect();

        if !to_remove.is_empty() {
            info!("Unsubscribing from market data: {:?}", to_remove);
            match self.gateway.unsubscribe(&to_remove) {
                Ok(()) => {
                    for id in &to_remove {
                        self.active.remove(id);
                    }
                }
                Err(e) => error!("Failed to unsubscribe market data: {}", e),
            }
        }
        if !to_add.is_empty() {
            info!("Subscribing to market data: {:?}", to_add);
            match self.gateway.subscribe(&to_add) {
                Ok(()) => self.active.extend(to_add),
                Err(e) => error!("Failed to subscribe market data: {}", e),
            }
        }
    }

    fn publish(&mut self, state: LinkState) {
        self.link = state;
        match self.shared_state.lock() {
            Ok(mut shared) => *shared = state,
            Err(e) => error!("Link state lock poisoned: {}", e),
        }
        let _ = self.events.send(SourceEvent::Link(state));
        let _ = self.startup.send(Startup::Reached(state));
    }
}

impl Drop for LinkDriver {
    fn drop(&mut self) {
        info!("Releasing gateway session");
        self.gateway.release();
        self.publish(LinkState::Disconnected);
    }
}
