//! Quote Client: a command-line front end for the quote distribution server.
//!
//! Every subcommand except `stream` sends one control request over TCP and prints the
//! response. `stream` optionally subscribes to instruments first, opens a push session
//! towards a local UDP port, keeps it alive with periodic `PING`s and prints every
//! event it receives until Ctrl+C.
//!
//! Usage example (CLI):
//! ```bash
//! quote_client --server-ip 192.168.0.10 subscribe rb2501 cu2501
//! quote_client --server-ip 192.168.0.10 stream --listen-port 55555 --path ./instruments.txt
//! quote_client health
//! ```
//!
//! An instrument file should contain ids separated by commas, spaces, or new lines.
#![warn(missing_docs)]
mod args;
mod sender;

use crate::args::{Args, ClientCommand, Instruments};
use crate::sender::CommandSender;
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{debug, error, info, warn};
use quote_common::net::MAX_DATAGRAM;
use quote_common::{
    ControlRequest, ControlResponse, InstrumentId, Quote, QuoteError, Result, ServerEvent,
};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// Server endpoints resolved from the command line.
struct Server {
    host: String,
    command_port: u16,
    data_port: u16,
}

impl Server {
    fn request(&self, request: &ControlRequest) -> Result<ControlResponse> {
        match CommandSender::send_request(&self.host, self.command_port, request)? {
            ControlResponse::Error { message } => {
                error!("Server rejected {:?}: {}", request, message);
                Err(QuoteError::Format(message))
            }
            response => Ok(response),
        }
    }

    fn data_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.data_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| QuoteError::Config(format!("cannot resolve {}", self.host)))
    }
}

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();
    let server = Server {
        host: args.server_ip.trim().replace('"', ""),
        command_port: args.command_port,
        data_port: args.data_port,
    };

    match args.command {
        ClientCommand::Subscribe(instruments) => {
            for id in collect_ids(&instruments)? {
                print_response(&server.request(&ControlRequest::Subscribe {
                    instrument_id: id.into(),
                })?);
            }
            Ok(())
        }
        ClientCommand::Unsubscribe(instruments) => {
            for id in collect_ids(&instruments)? {
                print_response(&server.request(&ControlRequest::Unsubscribe {
                    instrument_id: id.into(),
                })?);
            }
            Ok(())
        }
        ClientCommand::List => {
            print_response(&server.request(&ControlRequest::List)?);
            Ok(())
        }
        ClientCommand::Health => {
            print_response(&server.request(&ControlRequest::Health)?);
            Ok(())
        }
        ClientCommand::Quotes { instruments } => {
            print_response(&server.request(&ControlRequest::Quotes { instruments })?);
            Ok(())
        }
        ClientCommand::Stream {
            listen_port,
            instruments,
        } => stream(&server, &listen_port, &instruments),
    }
}

fn stream(server: &Server, listen_port: &str, instruments: &Instruments) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down client...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| QuoteError::Config(format!("failed to set Ctrl+C handler: {}", e)))?;
    }

    let listen_port: u16 = listen_port
        .trim()
        .replace('"', "")
        .parse()
        .map_err(|e| QuoteError::InvalidArgument(format!("invalid --listen-port: {}", e)))?;
    let mut listen_address = quote_common::net::addr("0.0.0.0", listen_port);
    if listen_port == server.data_port {
        warn!(
            "--listen-port={} matches the server data port. A free local port will be selected.",
            listen_port
        );
        listen_address = "0.0.0.0:0".to_string();
    }

    let socket = Arc::new(UdpSocket::bind(&listen_address)?);
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    let local_addr = socket.local_addr()?;
    info!("UDP client listening on: {}", local_addr);

    for id in collect_ids(instruments)? {
        print_response(&server.request(&ControlRequest::Subscribe {
            instrument_id: id.into(),
        })?);
    }

    if let ControlResponse::Streaming { session_id } = server.request(&ControlRequest::Stream {
        port: local_addr.port(),
    })? {
        info!("Push session {} opened", session_id);
    }

    let ping = CommandSender::start_ping_thread(
        socket.clone(),
        server.data_addr()?,
        shutdown.clone(),
    )?;
    info!("Client is running. Press Ctrl+C to exit.");
    let result = start_receiver_loop(socket, shutdown.clone());
    shutdown.store(true, Ordering::SeqCst);
    if ping.join().is_err() {
        warn!("Ping thread panicked");
    }
    result
}

/// Runs a blocking loop that receives push events from `socket` and prints them.
fn start_receiver_loop(socket: Arc<UdpSocket>, shutdown: Arc<AtomicBool>) -> Result<()> {
    let mut buf = [0u8; MAX_DATAGRAM];

    while !shutdown.load(Ordering::Relaxed) {
        match socket.recv(&mut buf) {
            Ok(size) => match ServerEvent::from_json_bytes(&buf[..size]) {
                Ok(ServerEvent::Quote(quote)) => print_quote(&quote),
                Ok(ServerEvent::ServerInfo(server_info)) => info!(
                    "SERVER: {} at {} ({} instruments subscribed)",
                    server_info.message,
                    format_millis(server_info.connected_at),
                    server_info.subscribed_count
                ),
                Err(_) => debug!(
                    "Received non-event message: {}",
                    String::from_utf8_lossy(&buf[..size])
                ),
            },
            Err(e) => {
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut {
                    continue;
                }
                error!("Receive data error: {}", e);
                return Err(QuoteError::Io(e));
            }
        }
    }
    info!("Receiver loop stopping...");
    Ok(())
}

fn print_response(response: &ControlResponse) {
    match response {
        ControlResponse::Ok {
            instrument_id,
            changed,
        } => info!("{}: {}", instrument_id, if *changed { "updated" } else { "unchanged" }),
        ControlResponse::Subscriptions { instruments } => {
            let ids: Vec<&str> = instruments.iter().map(InstrumentId::as_str).collect();
            info!("Subscribed ({}): {}", ids.len(), ids.join(", "));
        }
        ControlResponse::Health(health) => info!(
            "Source={} Ready={} Subscribed={} Degraded={} Sessions={}",
            health.source_mode,
            health.ready,
            health.subscribed_count,
            health.degraded,
            health.session_count
        ),
        ControlResponse::Quotes { quotes } => {
            if quotes.is_empty() {
                info!("No cached quotes");
            }
            quotes.iter().for_each(print_quote);
        }
        ControlResponse::Streaming { session_id } => info!("Streaming as session {}", session_id),
        ControlResponse::Error { message } => error!("Server error: {}", message),
    }
}

fn print_quote(quote: &Quote) {
    let volume = quote
        .volume
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    info!(
        "QUOTE: {} Price={:.2} Change={:+.2} ({:+.2}%) Volume={} Time={}",
        quote.instrument_id,
        quote.last_price,
        quote.change,
        quote.change_percent,
        volume,
        quote
            .update_time
            .clone()
            .unwrap_or_else(|| format_millis(quote.ts))
    );
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Inline ids followed by the ids read from `--path`, if given.
fn collect_ids(instruments: &Instruments) -> Result<Vec<InstrumentId>> {
    let mut ids = instruments
        .ids
        .iter()
        .map(|raw| InstrumentId::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    if let Some(path) = &instruments.path {
        let file_path = normalize_path(path);
        if !is_file_exist(&file_path) {
            return Err(QuoteError::InvalidArgument(format!(
                "instrument file {} not found",
                file_path.display()
            )));
        }
        let file = File::open(&file_path)?;
        ids.extend(InstrumentId::parse_list(BufReader::new(file))?);
    }
    info!("Instruments: {:?}", ids);
    Ok(ids)
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Normalize a CLI-provided path string by trimming whitespace and matching quotes.
///
/// This allows passing Windows paths in quotes without breaking parsing.
fn normalize_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let no_quotes = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    PathBuf::from(no_quotes)
}

/// Returns `true` if the provided path exists and is a regular file.
fn is_file_exist(path: &PathBuf) -> bool {
    path.exists() && path.is_file()
}
