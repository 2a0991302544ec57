//! Contract of a vendor market-data gateway session.
//!
//! A gateway is callback driven: requests return immediately and their outcome
//! arrives later as a [`GatewayEvent`] on the channel handed to
//! [`MarketGateway::register_front`]. The live source owns the gateway on its worker
//! thread and never calls it from anywhere else.

use crossbeam_channel::Sender;
use quote_common::{InstrumentId, Quote, Result};

/// Login material for the gateway front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Broker code.
    pub broker_id: String,
    /// Account id.
    pub user_id: String,
    /// Account password.
    pub password: String,
}

/// One depth-market-data tick in the gateway's own shape.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMarketData {
    /// Contract code; empty ticks are discarded.
    pub instrument_id: String,
    /// Last traded price.
    pub last_price: f64,
    /// Previous settlement price, `0` or sentinel when unknown.
    pub pre_settlement_price: f64,
    /// Previous close price, `0` or sentinel when unknown.
    pub pre_close_price: f64,
    /// Cumulative traded volume.
    pub volume: u64,
    /// Exchange time of day, `HH:MM:SS`.
    pub update_time: String,
    /// Millisecond part of `update_time`.
    pub update_millisec: u32,
}

/// Gateways report absent prices as zero or as a huge sentinel.
fn usable_price(price: f64) -> Option<f64> {
    (price.is_finite() && price > 0.0 && price < f64::MAX / 2.0).then_some(price)
}

impl DepthMarketData {
    /// Translate to a canonical quote.
    ///
    /// The reference price is the previous settlement, else the previous close;
    /// without either the change is zero.
    pub fn to_quote(&self) -> Option<Quote> {
        let instrument_id = InstrumentId::parse(&self.instrument_id).ok()?;
        let last_price = usable_price(self.last_price).unwrap_or(0.0);
        let reference =
            usable_price(self.pre_settlement_price).or_else(|| usable_price(self.pre_close_price));

        Some(
            Quote::from_reference(instrument_id, last_price, reference)
                .with_volume(self.volume)
                .with_update_time(self.update_time.clone(), self.update_millisec),
        )
    }
}

/// Asynchronous notification from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Transport to the front is up.
    FrontConnected,
    /// Transport to the front dropped.
    FrontDisconnected {
        /// Vendor reason code.
        reason: i32,
    },
    /// Answer to [`MarketGateway::login`].
    LoginResponse {
        /// Vendor error message, `None` on success.
        error: Option<String>,
    },
    /// Answer to a subscribe request, one per instrument.
    SubscribeResponse {
        /// Instrument the answer is about.
        instrument_id: String,
        /// Vendor error message, `None` on success.
        error: Option<String>,
    },
    /// Answer to an unsubscribe request, one per instrument.
    UnsubscribeResponse {
        /// Instrument the answer is about.
        instrument_id: String,
        /// Vendor error message, `None` on success.
        error: Option<String>,
    },
    /// Market data tick.
    DepthMarketData(DepthMarketData),
}

/// Vendor gateway session.
pub trait MarketGateway: Send {
    /// Start connecting to `front_address`; progress arrives on `events`.
    fn register_front(&mut self, front_address: &str, events: Sender<GatewayEvent>) -> Result<()>;

    /// Send a login request.
    fn login(&mut self, credentials: &Credentials) -> Result<()>;

    /// Request market data for `instruments`.
    fn subscribe(&mut self, instruments: &[InstrumentId]) -> Result<()>;

    /// Stop market data for `instruments`.
    fn unsubscribe(&mut self, instruments: &[InstrumentId]) -> Result<()>;

    /// Tear the session down. Called exactly once, on every exit path.
    fn release(&mut self);
}
