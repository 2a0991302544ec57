//! Simulated gateway front.
//!
//! `SimGateway` speaks the [`MarketGateway`] contract without a vendor library: it
//! answers `register_front` with `FrontConnected` after a connect delay, answers
//! `login` after a login delay (rejecting blank credentials), and while logged in
//! emits one depth tick per subscribed instrument every tick interval. Ticks carry
//! the instrument's reference price as previous settlement and move the last price by
//! up to ±`move_pct` percent per tick.

use std::collections::{BTreeSet, HashMap};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::{Receiver, Sender, select};
use log::{debug, info, warn};
use quote_common::quote::{MIN_PRICE, round2};
use quote_common::{InstrumentId, QuoteError, Result};
use rand::Rng;

use super::gateway::{Credentials, DepthMarketData, GatewayEvent, MarketGateway};
use super::synthetic::{DEFAULT_TABLE_PRICE, WELL_KNOWN_PRICES};

/// Timing and volatility of the simulated front.
#[derive(Debug, Clone)]
pub struct SimGatewayConfig {
    /// Delay before `FrontConnected`.
    pub connect_delay: Duration,
    /// Delay before `LoginResponse`.
    pub login_delay: Duration,
    /// Period between market data bursts.
    pub tick_interval: Duration,
    /// Largest per-tick move, in percent.
    pub move_pct: f64,
}

impl Default for SimGatewayConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(500),
            login_delay: Duration::from_millis(300),
            tick_interval: Duration::from_millis(500),
            move_pct: 2.0,
        }
    }
}

enum SimRequest {
    Login(Credentials),
    Subscribe(Vec<InstrumentId>),
    Unsubscribe(Vec<InstrumentId>),
    Release,
}

/// In-process stand-in for a vendor gateway front.
pub struct SimGateway {
    config: SimGatewayConfig,
    requests: Option<Sender<SimRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl SimGateway {
    /// Create an unregistered gateway.
    pub fn new(config: SimGatewayConfig) -> Self {
        Self {
            config,
            requests: None,
            handle: None,
        }
    }

    fn request(&self, request: SimRequest) -> Result<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| QuoteError::NotReady("front not registered".to_string()))?;
        requests
            .send(request)
            .map_err(|e| QuoteError::ChannelSend(e.to_string()))
    }
}

impl MarketGateway for SimGateway {
    fn register_front(&mut self, front_address: &str, events: Sender<GatewayEvent>) -> Result<()> {
        if self.requests.is_some() {
            return Err(QuoteError::Format("front already registered".to_string()));
        }
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let config = self.config.clone();
        info!("Simulated gateway front registered for {}", front_address);
        let handle = thread::Builder::new()
            .name("sim-gateway".to_string())
            .spawn(move || SimFront::new(config, events).run(request_rx))?;
        self.requests = Some(request_tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn login(&mut self, credentials: &Credentials) -> Result<()> {
        self.request(SimRequest::Login(credentials.clone()))
    }

    fn subscribe(&mut self, instruments: &[InstrumentId]) -> Result<()> {
        self.request(SimRequest::Subscribe(instruments.to_vec()))
    }

    fn unsubscribe(&mut self, instruments: &[InstrumentId]) -> Result<()> {
        self.request(SimRequest::Unsubscribe(instruments.to_vec()))
    }

    fn release(&mut self) {
        if let Some(requests) = self.requests.take() {
            let _ = requests.send(SimRequest::Release);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Simulated gateway thread panicked");
            }
        }
    }
}

struct SimPrice {
    settlement: f64,
    last: f64,
}

struct SimFront {
    config: SimGatewayConfig,
    events: Sender<GatewayEvent>,
    prices: HashMap<InstrumentId, SimPrice>,
    subscribed: BTreeSet<InstrumentId>,
    logged_in: bool,
}

impl SimFront {
    fn new(config: SimGatewayConfig, events: Sender<GatewayEvent>) -> Self {
        Self {
            config,
            events,
            prices: HashMap::new(),
            subscribed: BTreeSet::new(),
            logged_in: false,
        }
    }

    fn run(mut self, requests: Receiver<SimRequest>) {
        let connected = crossbeam_channel::after(self.config.connect_delay);
        let ticks = crossbeam_channel::tick(self.config.tick_interval);
        let mut login_due: Option<Instant> = None;
        let mut pending_login: Option<Credentials> = None;

        loop {
            let login_timer = match login_due {
                Some(at) => crossbeam_channel::at(at),
                None => crossbeam_channel::never(),
            };
            let delivered = select! {
                recv(connected) -> _ => self.emit(GatewayEvent::FrontConnected),
                recv(login_timer) -> _ => {
                    login_due = None;
                    let error = match pending_login.take() {
                        Some(c) if !c.user_id.is_empty() && !c.password.is_empty() => None,
                        _ => Some("CTP: invalid user or password".to_string()),
                    };
                    self.logged_in = error.is_none();
                    self.emit(GatewayEvent::LoginResponse { error })
                },
                recv(requests) -> request => match request {
                    Ok(SimRequest::Login(credentials)) => {
                        pending_login = Some(credentials);
                        login_due = Some(Instant::now() + self.config.login_delay);
                        true
                    }
                    Ok(SimRequest::Subscribe(ids)) => self.subscribe(ids),
                    Ok(SimRequest::Unsubscribe(ids)) => self.unsubscribe(ids),
                    Ok(SimRequest::Release) | Err(_) => break,
                },
                recv(ticks) -> _ => self.tick(),
            };
            if !delivered {
                debug!("Gateway event receiver closed");
                break;
            }
        }
        info!("Simulated gateway front released");
    }

    fn emit(&self, event: GatewayEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn subscribe(&mut self, ids: Vec<InstrumentId>) -> bool {
        for id in ids {
            let reference = WELL_KNOWN_PRICES
                .iter()
                .find(|(code, _)| *code == id.as_str())
                .map(|(_, price)| *price)
                .unwrap_or(DEFAULT_TABLE_PRICE);
            self.prices.entry(id.clone()).or_insert(SimPrice {
                settlement: reference,
                last: reference,
            });
            self.subscribed.insert(id.clone());
            if !self.emit(GatewayEvent::SubscribeResponse {
                instrument_id: id.to_string(),
                error: None,
            }) {
                return false;
            }
        }
        true
    }

    fn unsubscribe(&mut self, ids: Vec<InstrumentId>) -> bool {
        for id in ids {
            self.subscribed.remove(&id);
            if !self.emit(GatewayEvent::UnsubscribeResponse {
                instrument_id: id.to_string(),
                error: None,
            }) {
                return false;
            }
        }
        true
    }

    fn tick(&mut self) -> bool {
        if !self.logged_in {
            return true;
        }
        let mut rng = rand::rng();
        let now = Local::now();
        let update_time = now.format("%H:%M:%S").to_string();
        let update_millisec = now.timestamp_subsec_millis().min(999);

        for id in &self.subscribed {
            let Some(price) = self.prices.get_mut(id) else {
                continue;
            };
            let pct = rng.random_range(-self.config.move_pct..=self.config.move_pct);
            price.last = round2(price.last * (1.0 + pct / 100.0)).max(MIN_PRICE);

            let data = DepthMarketData {
                instrument_id: id.to_string(),
                last_price: price.last,
                pre_settlement_price: price.settlement,
                pre_close_price: 0.0,
                volume: rng.random_range(100..=10_000),
                update_time: update_time.clone(),
                update_millisec,
            };
            if self.events.send(GatewayEvent::DepthMarketData(data)).is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> SimGatewayConfig {
        SimGatewayConfig {
            connect_delay: Duration::from_millis(5),
            login_delay: Duration::from_millis(5),
            tick_interval: Duration::from_millis(10),
            move_pct: 2.0,
        }
    }

    fn credentials(user: &str) -> Credentials {
        Credentials {
            broker_id: "9999".to_string(),
            user_id: user.to_string(),
            password: "secret".to_string(),
        }
    }

    fn next(rx: &Receiver<GatewayEvent>) -> GatewayEvent {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn front_connects_logs_in_and_ticks() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut gateway = SimGateway::new(fast());
        gateway.register_front("tcp://sim", tx).unwrap();
        assert_eq!(next(&rx), GatewayEvent::FrontConnected);

        gateway.login(&credentials("trader")).unwrap();
        assert_eq!(next(&rx), GatewayEvent::LoginResponse { error: None });

        let rb = InstrumentId::parse("rb2501").unwrap();
        gateway.subscribe(&[rb]).unwrap();

        let tick = loop {
            if let GatewayEvent::DepthMarketData(data) = next(&rx) {
                break data;
            }
        };
        assert_eq!(tick.instrument_id, "rb2501");
        assert_eq!(tick.pre_settlement_price, 3500.0);
        assert!((tick.last_price - 3500.0).abs() <= 70.0 + 0.01);
        assert!((100..=10_000).contains(&tick.volume));

        gateway.release();
    }

    #[test]
    fn blank_credentials_are_rejected() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut gateway = SimGateway::new(fast());
        gateway.register_front("tcp://sim", tx).unwrap();
        assert_eq!(next(&rx), GatewayEvent::FrontConnected);

        gateway.login(&credentials("")).unwrap();
        assert!(matches!(
            next(&rx),
            GatewayEvent::LoginResponse { error: Some(_) }
        ));
        gateway.release();
    }

    #[test]
    fn requests_before_registration_fail() {
        let mut gateway = SimGateway::new(fast());
        assert!(matches!(
            gateway.login(&credentials("trader")),
            Err(QuoteError::NotReady(_))
        ));
        gateway.release();
    }
}
