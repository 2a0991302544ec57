//! Random-walk quote generator.
//!
//! The generator runs a background thread that, once per tick, moves the base price of
//! every watched instrument by a random delta and pushes the resulting `Quote`. A base
//! price is drawn the first time an instrument is seen and forgotten as soon as the
//! instrument leaves the watch list, so a re-subscription starts from a fresh draw.
//!
//! Cadence is `active_interval` while something is watched and `idle_interval`
//! otherwise.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::ValueEnum;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use quote_common::{InstrumentId, Quote, Result, SourceMode};
use rand::Rng;

use super::{QuoteSource, SourceEvent, join_within};

/// Reference prices for well-known contract codes.
pub const WELL_KNOWN_PRICES: &[(&str, f64)] = &[
    ("rb2501", 3500.0),
    ("hc2501", 3600.0),
    ("i2501", 800.0),
    ("j2501", 2500.0),
    ("jm2501", 1800.0),
    ("cu2501", 70000.0),
    ("al2501", 18000.0),
    ("zn2501", 25000.0),
    ("ag2501", 6000.0),
    ("au2501", 500.0),
];

/// Price used for instruments missing from [`WELL_KNOWN_PRICES`].
pub const DEFAULT_TABLE_PRICE: f64 = 1000.0;

/// How the first base price of an instrument is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceSeed {
    /// Uniform draw from `[low, high]`.
    Uniform {
        /// Inclusive lower bound.
        low: f64,
        /// Inclusive upper bound.
        high: f64,
    },
    /// [`WELL_KNOWN_PRICES`], falling back to [`DEFAULT_TABLE_PRICE`].
    Table,
}

impl PriceSeed {
    fn initial_price<R: Rng + ?Sized>(&self, id: &InstrumentId, rng: &mut R) -> f64 {
        match *self {
            PriceSeed::Uniform { low, high } if high > low => rng.random_range(low..=high),
            PriceSeed::Uniform { low, .. } => low,
            PriceSeed::Table => WELL_KNOWN_PRICES
                .iter()
                .find(|(code, _)| *code == id.as_str())
                .map(|(_, price)| *price)
                .unwrap_or(DEFAULT_TABLE_PRICE),
        }
    }
}

/// Perturbation policy selector, as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum PerturbationKind {
    /// Fixed-size delta in price units.
    Absolute,
    /// Delta proportional to the base price.
    Relative,
}

/// Per-tick price move applied uniformly to every instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Perturbation {
    /// Uniform delta in `[-size, size]` price units.
    Absolute(f64),
    /// Uniform delta in `[-pct, pct]` percent of the base price.
    Relative(f64),
}

impl Perturbation {
    /// Build a policy; a missing `size` takes the kind's default (5 units or 2 %).
    pub fn new(kind: PerturbationKind, size: Option<f64>) -> Self {
        match kind {
            PerturbationKind::Absolute => Perturbation::Absolute(size.unwrap_or(5.0).abs()),
            PerturbationKind::Relative => Perturbation::Relative(size.unwrap_or(2.0).abs()),
        }
    }

    fn delta<R: Rng + ?Sized>(&self, base: f64, rng: &mut R) -> f64 {
        match *self {
            Perturbation::Absolute(size) => rng.random_range(-size..=size),
            Perturbation::Relative(pct) => base * rng.random_range(-pct..=pct) / 100.0,
        }
    }
}

impl Default for Perturbation {
    fn default() -> Self {
        Perturbation::Absolute(5.0)
    }
}

/// Settings for the synthetic generator.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// First-observation price policy.
    pub seed: PriceSeed,
    /// Per-tick move policy.
    pub perturbation: Perturbation,
    /// Tick period while the watch list is non-empty.
    pub active_interval: Duration,
    /// Tick period while the watch list is empty.
    pub idle_interval: Duration,
    /// How long `stop` waits for the tick thread.
    pub stop_grace: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: PriceSeed::Uniform {
                low: 1000.0,
                high: 5000.0,
            },
            perturbation: Perturbation::default(),
            active_interval: Duration::from_millis(400),
            idle_interval: Duration::from_millis(900),
            stop_grace: Duration::from_secs(1),
        }
    }
}

/// Running base prices, one per watched instrument.
#[derive(Debug)]
pub struct PriceWalk {
    bases: HashMap<InstrumentId, f64>,
    seed: PriceSeed,
    perturbation: Perturbation,
}

impl PriceWalk {
    /// Create an empty walk.
    pub fn new(seed: PriceSeed, perturbation: Perturbation) -> Self {
        Self {
            bases: HashMap::new(),
            seed,
            perturbation,
        }
    }

    /// Current base price of `id`, if it has been observed.
    pub fn base(&self, id: &InstrumentId) -> Option<f64> {
        self.bases.get(id).copied()
    }

    /// Forget every instrument not in `watch`.
    pub fn retain(&mut self, watch: &BTreeSet<InstrumentId>) {
        self.bases.retain(|id, _| watch.contains(id));
    }

    /// Move `id` one step and return the resulting quote.
    pub fn next_quote<R: Rng + ?Sized>(&mut self, id: &InstrumentId, rng: &mut R) -> Quote {
        let base = match self.bases.get(id) {
            Some(base) => *base,
            None => self.seed.initial_price(id, rng),
        };
        let delta = self.perturbation.delta(base, rng);
        let quote = Quote::from_move(id.clone(), base, base + delta);
        self.bases.insert(id.clone(), quote.last_price);
        quote
    }
}

struct Watch {
    instruments: BTreeSet<InstrumentId>,
    walk: PriceWalk,
}

struct Ticker {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Synthetic quote source backed by a [`PriceWalk`].
pub struct SyntheticSource {
    config: SyntheticConfig,
    watch: Arc<Mutex<Watch>>,
    events: Sender<SourceEvent>,
    ticker: Option<Ticker>,
}

impl SyntheticSource {
    /// Create a stopped generator that will push into `events`.
    pub fn new(config: SyntheticConfig, events: Sender<SourceEvent>) -> Self {
        let walk = PriceWalk::new(config.seed, config.perturbation);
        Self {
            config,
            watch: Arc::new(Mutex::new(Watch {
                instruments: BTreeSet::new(),
                walk,
            })),
            events,
            ticker: None,
        }
    }
}

impl QuoteSource for SyntheticSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Synthetic
    }

    fn start(&mut self) -> Result<()> {
        if self.ticker.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let watch = Arc::clone(&self.watch);
        let events = self.events.clone();
        let active = self.config.active_interval;
        let idle = self.config.idle_interval;

        let handle = thread::Builder::new()
            .name("synthetic-ticks".to_string())
            .spawn(move || {
                let _done = done_tx;
                run_ticks(watch, events, stop_rx, active, idle);
            })?;

        self.ticker = Some(Ticker {
            stop_tx,
            done_rx,
            handle,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.stop_tx.try_send(());
            join_within(
                "synthetic generator",
                ticker.handle,
                &ticker.done_rx,
                self.config.stop_grace,
            );
        }
        Ok(())
    }

    fn set_watch_list(&mut self, instruments: &BTreeSet<InstrumentId>) -> Result<()> {
        let mut watch = self.watch.lock()?;
        watch.walk.retain(instruments);
        watch.instruments = instruments.clone();
        debug!("Synthetic watch list: {:?}", watch.instruments);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ticker.is_some()
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run_ticks(
    watch: Arc<Mutex<Watch>>,
    events: Sender<SourceEvent>,
    stop_rx: Receiver<()>,
    active: Duration,
    idle: Duration,
) {
    let mut rng = rand::rng();
    info!(
        "Synthetic generator started (thread {:?})",
        thread::current().id()
    );

    loop {
        let interval = match watch.lock() {
            Ok(mut guard) => {
                let Watch { instruments, walk } = &mut *guard;
                for id in instruments.iter() {
                    let quote = walk.next_quote(id, &mut rng);
                    if events.send(SourceEvent::quote(quote)).is_err() {
                        info!("Quote receiver closed; synthetic generator exiting");
                        return;
                    }
                }
                if instruments.is_empty() { idle } else { active }
            }
            Err(e) => {
                error!("Synthetic watch list lock poisoned: {}", e);
                return;
            }
        };

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("Synthetic generator stopped");
}
