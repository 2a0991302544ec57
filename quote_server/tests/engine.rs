use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use quote_common::quote::{MIN_PRICE, now_millis, round2};
use quote_common::{InstrumentId, Quote, QuoteError, Result, ServerEvent, SourceMode};
use quote_server::engine::{DistributionEngine, EngineConfig};
use quote_server::sessions::SessionConfig;
use quote_server::source::gateway::{Credentials, GatewayEvent, MarketGateway};
use quote_server::source::sim_gateway::{SimGateway, SimGatewayConfig};
use quote_server::source::synthetic::PriceSeed;
use quote_server::source::{LiveConfig, SyntheticConfig};

const TICK: Duration = Duration::from_millis(20);

fn synthetic_config() -> EngineConfig {
    EngineConfig {
        synthetic: SyntheticConfig {
            active_interval: TICK,
            idle_interval: TICK,
            ..SyntheticConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn live_config(password: &str) -> EngineConfig {
    EngineConfig {
        preferred: SourceMode::Live,
        live: Some(LiveConfig {
            front_address: "tcp://127.0.0.1:10131".to_string(),
            credentials: Credentials {
                broker_id: "9999".to_string(),
                user_id: "trader".to_string(),
                password: password.to_string(),
            },
            ready_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_secs(1),
        }),
        ..synthetic_config()
    }
}

fn fast_sim_gateway() -> Box<dyn MarketGateway> {
    Box::new(SimGateway::new(SimGatewayConfig {
        connect_delay: Duration::from_millis(10),
        login_delay: Duration::from_millis(10),
        tick_interval: TICK,
        move_pct: 2.0,
    }))
}

fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn next_quote(events: &Receiver<ServerEvent>) -> Quote {
    loop {
        match events.recv_timeout(Duration::from_secs(3)).unwrap() {
            ServerEvent::Quote(quote) => return quote,
            ServerEvent::ServerInfo(_) => continue,
        }
    }
}

fn has_quote(engine: &DistributionEngine, id: &str) -> bool {
    engine.last_quote(id).unwrap().is_some()
}

#[test]
fn add_then_remove_restores_snapshot_and_evicts() {
    let engine = DistributionEngine::start(synthetic_config(), None).unwrap();
    assert!(engine.subscribe("rb2501").unwrap().changed);
    assert!(!engine.subscribe(" rb2501 ").unwrap().changed);
    wait_for("first quote", || has_quote(&engine, "rb2501"));

    assert!(engine.unsubscribe("rb2501").unwrap().changed);
    assert!(engine.subscriptions().unwrap().is_empty());
    assert!(!has_quote(&engine, "rb2501"));
    assert!(engine.quotes(&[]).unwrap().is_empty());
    assert!(!engine.unsubscribe("rb2501").unwrap().changed);
}

#[test]
fn first_quote_is_priced_from_a_uniform_base() {
    let engine = DistributionEngine::start(synthetic_config(), None).unwrap();
    let session = engine.connect_client().unwrap();
    engine.subscribe("rb2501").unwrap();

    let quote = next_quote(&session.events);
    assert_eq!(quote.instrument_id.as_str(), "rb2501");
    assert!((995.0..=5005.0).contains(&quote.last_price));
    assert!(quote.last_price >= MIN_PRICE);
    assert_eq!(round2(quote.last_price), quote.last_price);
    assert!(quote.change.abs() <= 5.0 + 0.01);

    let base = quote.last_price - quote.change;
    assert!((quote.change_percent - round2(quote.change / base * 100.0)).abs() <= 0.02);
    assert!(quote.volume.is_none());
}

#[test]
fn new_session_gets_greeting_then_one_quote_per_instrument() {
    let engine = DistributionEngine::start(synthetic_config(), None).unwrap();
    engine.subscribe("rb2501").unwrap();
    engine.subscribe("cu2501").unwrap();
    wait_for("both cached", || engine.quotes(&[]).unwrap().len() == 2);

    let session = engine.connect_client().unwrap();
    match session.events.recv().unwrap() {
        ServerEvent::ServerInfo(info) => {
            assert_eq!(info.message, "connected");
            assert_eq!(info.subscribed_count, 2);
        }
        other => panic!("expected server_info, got {other:?}"),
    }

    let burst: Vec<String> = (0..2)
        .map(|_| match session.events.recv().unwrap() {
            ServerEvent::Quote(quote) => quote.instrument_id.to_string(),
            other => panic!("expected quote, got {other:?}"),
        })
        .collect();
    assert_eq!(burst, vec!["cu2501".to_string(), "rb2501".to_string()]);
}

#[test]
fn unsubscribe_stops_quotes_within_a_tick() {
    let engine = DistributionEngine::start(synthetic_config(), None).unwrap();
    engine.subscribe("rb2501").unwrap();
    engine.subscribe("au2501").unwrap();
    let session = engine.connect_client().unwrap();
    wait_for("both flowing", || engine.quotes(&[]).unwrap().len() == 2);

    engine.unsubscribe("rb2501").unwrap();
    thread::sleep(TICK);
    let _: Vec<ServerEvent> = session.events.try_iter().collect();

    thread::sleep(TICK * 5);
    let later: Vec<Quote> = session
        .events
        .try_iter()
        .filter_map(|event| match event {
            ServerEvent::Quote(quote) => Some(quote),
            ServerEvent::ServerInfo(_) => None,
        })
        .collect();
    assert!(later.iter().all(|q| q.instrument_id.as_str() == "au2501"));
    assert!(!later.is_empty());
}

#[test]
fn resubscribe_never_replays_the_old_quote() {
    let mut config = synthetic_config();
    config.synthetic.seed = PriceSeed::Table;
    let engine = DistributionEngine::start(config, None).unwrap();
    engine.subscribe("rb2501").unwrap();
    wait_for("walk to drift", || {
        engine
            .last_quote("rb2501")
            .unwrap()
            .is_some_and(|quote| quote.last_price != 3500.0)
    });
    let old = engine.last_quote("rb2501").unwrap().unwrap();

    engine.unsubscribe("rb2501").unwrap();
    thread::sleep(TICK * 2);
    let session = engine.connect_client().unwrap();
    let resubscribed_at = now_millis();
    engine.subscribe("rb2501").unwrap();

    let fresh = next_quote(&session.events);
    assert!(fresh.ts >= resubscribed_at);
    assert!(old.ts < resubscribed_at);

    let fresh_base = round2(fresh.last_price - fresh.change);
    assert_eq!(fresh_base, 3500.0);
    assert_ne!(fresh_base, old.last_price);
}

#[test]
fn concurrent_adds_produce_one_entry() {
    let engine = Arc::new(DistributionEngine::start(synthetic_config(), None).unwrap());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.subscribe("rb2501").unwrap().changed
            })
        })
        .collect();
    let changed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|changed| *changed)
        .count();

    assert_eq!(changed, 1);
    assert_eq!(
        engine.subscriptions().unwrap(),
        vec![InstrumentId::parse("rb2501").unwrap()]
    );
}

#[test]
fn stalled_session_is_dropped_while_others_keep_receiving() {
    let config = EngineConfig {
        sessions: SessionConfig { queue_capacity: 4 },
        ..synthetic_config()
    };
    let engine = DistributionEngine::start(config, None).unwrap();
    let stalled = engine.connect_client().unwrap();
    let fast = engine.connect_client().unwrap();
    for id in ["rb2501", "hc2501", "cu2501"] {
        engine.subscribe(id).unwrap();
    }

    let received = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&received);
    let drain = thread::spawn(move || {
        while let Ok(event) = fast.events.recv_timeout(Duration::from_millis(500)) {
            if matches!(event, ServerEvent::Quote(_)) {
                *counter.lock().unwrap() += 1;
            }
        }
    });

    wait_for("stalled session dropped", || {
        engine.health().unwrap().session_count == 1
    });
    let before = *received.lock().unwrap();
    wait_for("fast session still served", || {
        *received.lock().unwrap() > before + 3
    });

    assert!(!engine.disconnect_client(stalled.id).unwrap());
    engine.stop().unwrap();
    drain.join().unwrap();
}

#[test]
fn live_source_over_simulated_front() {
    let engine = DistributionEngine::start(live_config("secret"), Some(fast_sim_gateway())).unwrap();
    let health = engine.health().unwrap();
    assert_eq!(health.source_mode, SourceMode::Live);
    assert!(health.ready);
    assert!(!health.degraded);

    let session = engine.connect_client().unwrap();
    engine.subscribe("rb2501").unwrap();
    let quote = next_quote(&session.events);
    assert_eq!(quote.instrument_id.as_str(), "rb2501");
    assert!(quote.volume.is_some());
    assert_eq!(quote.update_time.as_deref().map(str::len), Some(8));
    assert_eq!(round2(quote.last_price - 3500.0), quote.change);
}

#[test]
fn clean_stop_of_live_source_is_not_degraded() {
    let engine = DistributionEngine::start(live_config("secret"), Some(fast_sim_gateway())).unwrap();
    engine.subscribe("rb2501").unwrap();
    wait_for("live quote", || has_quote(&engine, "rb2501"));

    engine.stop().unwrap();
    thread::sleep(TICK * 3);
    let health = engine.health().unwrap();
    assert!(!health.ready);
    assert!(!health.degraded);
}

#[test]
fn rejected_login_falls_back_to_synthetic() {
    let engine = DistributionEngine::start(live_config(""), Some(fast_sim_gateway())).unwrap();
    let health = engine.health().unwrap();
    assert_eq!(health.source_mode, SourceMode::Synthetic);
    assert!(health.ready);

    engine.subscribe("rb2501").unwrap();
    wait_for("synthetic quote", || has_quote(&engine, "rb2501"));
    assert!(engine.last_quote("rb2501").unwrap().unwrap().volume.is_none());
}

#[derive(Clone, Default)]
struct Front {
    events: Arc<Mutex<Option<Sender<GatewayEvent>>>>,
    subscribe_calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Front {
    fn emit(&self, event: GatewayEvent) {
        let events = self.events.lock().unwrap();
        events.as_ref().unwrap().send(event).unwrap();
    }
}

struct ScriptedFront(Front);

impl MarketGateway for ScriptedFront {
    fn register_front(&mut self, _front: &str, events: Sender<GatewayEvent>) -> Result<()> {
        events
            .send(GatewayEvent::FrontConnected)
            .map_err(|e| QuoteError::ChannelSend(e.to_string()))?;
        *self.0.events.lock()? = Some(events);
        Ok(())
    }

    fn login(&mut self, _credentials: &Credentials) -> Result<()> {
        self.0.emit(GatewayEvent::LoginResponse { error: None });
        Ok(())
    }

    fn subscribe(&mut self, instruments: &[InstrumentId]) -> Result<()> {
        let ids = instruments.iter().map(|id| id.to_string()).collect();
        self.0.subscribe_calls.lock()?.push(ids);
        Ok(())
    }

    fn unsubscribe(&mut self, _instruments: &[InstrumentId]) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) {}
}

#[test]
fn dropped_transport_marks_degraded_until_ready_again() {
    let front = Front::default();
    let gateway = Box::new(ScriptedFront(front.clone()));
    let engine = DistributionEngine::start(live_config("secret"), Some(gateway)).unwrap();
    wait_for("ready", || engine.health().unwrap().ready);

    front.emit(GatewayEvent::FrontDisconnected { reason: 4097 });
    wait_for("degraded", || engine.health().unwrap().degraded);
    let health = engine.health().unwrap();
    assert_eq!(health.source_mode, SourceMode::Live);
    assert!(!health.ready);

    front.emit(GatewayEvent::FrontConnected);
    wait_for("recovered", || {
        let health = engine.health().unwrap();
        health.ready && !health.degraded
    });
}

#[test]
fn concurrent_adds_reach_the_gateway_once() {
    let front = Front::default();
    let gateway = Box::new(ScriptedFront(front.clone()));
    let engine = Arc::new(DistributionEngine::start(live_config("secret"), Some(gateway)).unwrap());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.subscribe("rb2501").unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    wait_for("gateway subscribe", || {
        !front.subscribe_calls.lock().unwrap().is_empty()
    });
    thread::sleep(TICK * 2);
    let calls = front.subscribe_calls.lock().unwrap().clone();
    assert_eq!(calls, vec![vec!["rb2501".to_string()]]);

    let distinct: HashSet<String> = engine
        .subscriptions()
        .unwrap()
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(distinct.len(), 1);
}
