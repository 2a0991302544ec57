//! TCP control API.

use crate::engine::DistributionEngine;
use crate::stream::StreamRequest;
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use quote_common::command::{read_message, write_message};
use quote_common::{ControlRequest, ControlResponse, QuoteError, Result};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// TCP control receiver.
///
/// Each accepted connection carries one JSON `ControlRequest` and gets one
/// `ControlResponse` back. Stream requests register a push session with the engine
/// and hand it to the server loop through a channel. A failure on one connection is
/// logged and never stops the listener.
pub struct ControlReceiver {
    socket: TcpListener,
    read_timeout: Duration,
}

impl ControlReceiver {
    /// Bind a new receiver to `bind_addr` (e.g., `0.0.0.0:8080`).
    pub fn bind(bind_addr: SocketAddr, read_timeout: Duration) -> Result<Self> {
        let socket = TcpListener::bind(bind_addr)?;
        Ok(Self {
            socket,
            read_timeout,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Blocking accept loop. Each connection is served on its own thread.
    pub fn serve(self, engine: Arc<DistributionEngine>, streams: Sender<StreamRequest>) -> Result<()> {
        info!("Control TCP server is started on {}", self.socket.local_addr()?);

        for stream in self.socket.incoming() {
            match stream {
                Ok(stream) => {
                    let engine = Arc::clone(&engine);
                    let streams = streams.clone();
                    let read_timeout = self.read_timeout;
                    let spawned = thread::Builder::new()
                        .name("control-connection".to_string())
                        .spawn(move || {
                            if let Err(e) = handle_connection(stream, read_timeout, &engine, &streams) {
                                warn!("Control connection failed: {}", e);
                            }
                        });
                    if let Err(e) = spawned {
                        error!("Failed to spawn control connection handler: {}", e);
                    }
                }
                Err(e) => error!("TCP connection error: {}", e),
            }
        }
        Ok(())
    }
}

fn handle_connection(
    mut stream: TcpStream,
    read_timeout: Duration,
    engine: &DistributionEngine,
    streams: &Sender<StreamRequest>,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_read_timeout(Some(read_timeout))?;

    let response = match read_message::<_, ControlRequest>(&stream) {
        Ok(request) => {
            info!("Received {:?} from {}", request, peer);
            handle_request(engine, request, peer, streams)
        }
        Err(e) => {
            warn!("Malformed request from {}: {}", peer, e);
            ControlResponse::error(&e)
        }
    };
    debug!("Responding to {}: {:?}", peer, response);
    write_message(&mut stream, &response)?;
    stream.shutdown(Shutdown::Write)?;
    Ok(())
}

/// Execute one control request against the engine.
///
/// Errors are folded into `ControlResponse::Error`.
pub fn handle_request(
    engine: &DistributionEngine,
    request: ControlRequest,
    peer: SocketAddr,
    streams: &Sender<StreamRequest>,
) -> ControlResponse {
    let result = match request {
        ControlRequest::Subscribe { instrument_id } => engine
            .subscribe(&instrument_id)
            .map(|change| ControlResponse::Ok {
                instrument_id: change.instrument_id,
                changed: change.changed,
            }),
        ControlRequest::Unsubscribe { instrument_id } => engine
            .unsubscribe(&instrument_id)
            .map(|change| ControlResponse::Ok {
                instrument_id: change.instrument_id,
                changed: change.changed,
            }),
        ControlRequest::List => engine
            .subscriptions()
            .map(|instruments| ControlResponse::Subscriptions { instruments }),
        ControlRequest::Health => engine.health().map(ControlResponse::Health),
        ControlRequest::Quotes { instruments } => engine
            .quotes(&instruments)
            .map(|quotes| ControlResponse::Quotes { quotes }),
        ControlRequest::Stream { port } => open_stream(engine, peer, port, streams),
    };
    result.unwrap_or_else(|e| ControlResponse::error(&e))
}

fn open_stream(
    engine: &DistributionEngine,
    peer: SocketAddr,
    port: u16,
    streams: &Sender<StreamRequest>,
) -> Result<ControlResponse> {
    if port == 0 {
        return Err(QuoteError::InvalidArgument(
            "stream port must be non-zero".to_string(),
        ));
    }
    let target = SocketAddr::new(peer.ip(), port);
    let session = engine.connect_client()?;
    let session_id = session.id;

    if let Err(e) = streams.send(StreamRequest { target, session }) {
        engine.disconnect_client(session_id)?;
        return Err(QuoteError::ChannelSend(e.to_string()));
    }
    info!("Session {} will stream to {}", session_id, target);
    Ok(ControlResponse::Streaming { session_id })
}
