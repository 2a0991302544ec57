//! Quote distribution server.
//!
//! Wires the [`DistributionEngine`] to the network:
//!
//! - `ControlReceiver` accepts one JSON control request per TCP connection
//!   (subscribe, unsubscribe, list, health, quotes, stream).
//! - A `stream` request registers a push session; this loop spawns a forwarding
//!   thread that sends the session's events to the client as UDP datagrams.
//! - `UdpPingListener` records client `PING`s on the data socket and the ping checker
//!   reports streams that went silent, which are then closed.
//!
//! Ctrl+C stops the loop, every stream, and the engine.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use log::{error, info, warn};
use quote_common::{QuoteError, Result, SourceMode};
use quote_server::config::ServerArgs;
use quote_server::engine::{DistributionEngine, EngineConfig};
use quote_server::model::ping_monitor::PingMonitor;
use quote_server::receiver::ControlReceiver;
use quote_server::sessions::SessionId;
use quote_server::source::gateway::MarketGateway;
use quote_server::source::sim_gateway::{SimGateway, SimGatewayConfig};
use quote_server::stream::{StreamRequest, handle_client_stream};
use quote_server::udp_listener::{UdpPingListener, start_ping_checker};

const PING_CHECK_INTERVAL: Duration = Duration::from_secs(1);

struct ActiveStream {
    target: SocketAddr,
    stop_tx: Sender<()>,
}

fn main() -> Result<()> {
    init_logger();
    let args = ServerArgs::parse();
    let config = args.engine_config()?;
    let gateway = gateway_for(&config, args.ctp_use_mock);
    let engine = Arc::new(DistributionEngine::start(config, gateway)?);

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down server...");
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| QuoteError::Config(format!("failed to set Ctrl+C handler: {}", e)))?;

    let udp_socket = Arc::new(UdpSocket::bind(args.data_addr()?)?);
    info!("UDP socket created on: {}", udp_socket.local_addr()?);
    let ping_monitor = Arc::new(Mutex::new(PingMonitor::new(args.keepalive())));
    UdpPingListener::start(Arc::clone(&udp_socket), Arc::clone(&ping_monitor))?;

    let (timeouts_tx, timeouts_rx) = unbounded::<(SocketAddr, SessionId)>();
    let (checker_stop_tx, checker_stop_rx) = bounded::<()>(1);
    let checker = start_ping_checker(
        Arc::clone(&ping_monitor),
        PING_CHECK_INTERVAL,
        timeouts_tx,
        checker_stop_rx,
    )?;

    let (streams_tx, streams_rx) = unbounded::<StreamRequest>();
    let receiver = ControlReceiver::bind(args.command_addr()?, args.read_timeout())?;
    let receiver_engine = Arc::clone(&engine);
    thread::Builder::new()
        .name("control-receiver".to_string())
        .spawn(move || {
            if let Err(e) = receiver.serve(receiver_engine, streams_tx) {
                error!("Control receiver failed: {}", e);
            }
        })?;

    let result = run_streams(
        &engine,
        &udp_socket,
        &ping_monitor,
        streams_rx,
        timeouts_rx,
        shutdown_rx,
    );

    let _ = checker_stop_tx.try_send(());
    if checker.join().is_err() {
        warn!("Ping checker panicked");
    }
    engine.stop()?;
    info!("Server stopped");
    result
}

/// Pick the gateway session for the live source.
///
/// No vendor binding is compiled in, so live mode always talks to the simulated front.
fn gateway_for(config: &EngineConfig, mock: bool) -> Option<Box<dyn MarketGateway>> {
    if config.preferred != SourceMode::Live || config.live.is_none() {
        return None;
    }
    if mock {
        info!("Live source uses the simulated gateway front");
    } else {
        warn!("No vendor gateway binding available; live source uses the simulated gateway front");
    }
    Some(Box::new(SimGateway::new(SimGatewayConfig::default())))
}

fn run_streams(
    engine: &DistributionEngine,
    udp_socket: &Arc<UdpSocket>,
    ping_monitor: &Mutex<PingMonitor>,
    streams_rx: Receiver<StreamRequest>,
    timeouts_rx: Receiver<(SocketAddr, SessionId)>,
    shutdown_rx: Receiver<()>,
) -> Result<()> {
    let (closed_tx, closed_rx) = unbounded::<SessionId>();
    let mut active: HashMap<SessionId, ActiveStream> = HashMap::new();

    loop {
        select! {
            recv(streams_rx) -> msg => match msg {
                Ok(StreamRequest { target, session }) => {
                    let id = session.id;
                    let previous = ping_monitor.lock()?.register(target, id);
                    if let Some(previous) = previous {
                        info!("Stream {} for {} replaced by {}", previous, target, id);
                        close_stream(engine, &mut active, previous)?;
                    }

                    let (stop_tx, stop_rx) = bounded::<()>(1);
                    let socket = Arc::clone(udp_socket);
                    let closed = closed_tx.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("stream-{}", id))
                        .spawn(move || {
                            if let Err(e) = handle_client_stream(socket, target, session.events, stop_rx) {
                                warn!("Stream {} to {} ended: {}", id, target, e);
                            }
                            let _ = closed.send(id);
                        });

                    match spawned {
                        Ok(_) => {
                            active.insert(id, ActiveStream { target, stop_tx });
                            info!("A stream has been created for the client on UDP address {}", target);
                        }
                        Err(e) => {
                            error!("Failed to spawn stream for {}: {}", target, e);
                            ping_monitor.lock()?.remove(&target, id);
                            engine.disconnect_client(id)?;
                        }
                    }
                }
                Err(_) => {
                    info!("Control receiver closed");
                    break;
                }
            },

            recv(timeouts_rx) -> msg => if let Ok((addr, id)) = msg {
                info!("Stream {} for {} closed: ping timeout", id, addr);
                close_stream(engine, &mut active, id)?;
            },

            recv(closed_rx) -> msg => if let Ok(id) = msg {
                if let Some(stream) = active.remove(&id) {
                    ping_monitor.lock()?.remove(&stream.target, id);
                    engine.disconnect_client(id)?;
                    info!("Stream {} for {} finished", id, stream.target);
                }
            },

            recv(shutdown_rx) -> _ => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    for (_, stream) in active.drain() {
        let _ = stream.stop_tx.try_send(());
    }
    Ok(())
}

fn close_stream(
    engine: &DistributionEngine,
    active: &mut HashMap<SessionId, ActiveStream>,
    id: SessionId,
) -> Result<()> {
    if let Some(stream) = active.remove(&id) {
        let _ = stream.stop_tx.try_send(());
    }
    engine.disconnect_client(id)?;
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
