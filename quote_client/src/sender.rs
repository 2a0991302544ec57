//! Talking to the quote server.
//!
//! Control requests travel over a short-lived TCP connection: one JSON request out,
//! one JSON response back. Push sessions are kept alive by a background thread that
//! sends `PING` datagrams from the receiving UDP socket.
use log::{debug, error, info};
use quote_common::command::{read_message, write_message};
use quote_common::net::PING;
use quote_common::{ControlRequest, ControlResponse, QuoteError, Result};
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// PING interval in milliseconds used by the background thread.
const INTERVAL_MS: u64 = 2000;

/// Helper type for sending requests to the server.
pub struct CommandSender;

impl CommandSender {
    /// Send `request` to the control port at `host:port` and wait for the response.
    pub fn send_request(host: &str, port: u16, request: &ControlRequest) -> Result<ControlResponse> {
        let mut stream = TcpStream::connect((host, port)).map_err(|e| {
            QuoteError::Format(format!("Failed to connect to server {}:{}: {}", host, port, e))
        })?;
        debug!("Sending {:?} to {}:{}", request, host, port);
        write_message(&mut stream, request)?;
        stream.shutdown(Shutdown::Write)?;
        read_message(&stream)
    }

    /// Ping `target` from `socket` until `shutdown` is set.
    pub fn start_ping_thread(
        socket: Arc<UdpSocket>,
        target: SocketAddr,
        shutdown: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        info!("Ping thread started. Target: {}", target);
        let handle = thread::Builder::new()
            .name("ping".to_string())
            .spawn(move || {
                let interval = Duration::from_millis(INTERVAL_MS);
                while !shutdown.load(Ordering::Relaxed) {
                    match socket.send_to(PING, target) {
                        Ok(_) => debug!("PING sent to {}", target),
                        Err(ref e) if e.kind() == ErrorKind::ConnectionReset => {}
                        Err(e) => error!("Failed to send PING: {}", e),
                    }
                    thread::sleep(interval);
                }
                info!("Ping thread stopping...");
            })?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn request_and_response_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request: ControlRequest = read_message(&stream).unwrap();
            assert_eq!(request, ControlRequest::List);
            write_message(
                &mut stream,
                &ControlResponse::Subscriptions {
                    instruments: vec![],
                },
            )
            .unwrap();
        });

        let response = CommandSender::send_request("127.0.0.1", port, &ControlRequest::List).unwrap();
        assert_eq!(
            response,
            ControlResponse::Subscriptions {
                instruments: vec![]
            }
        );
        server.join().unwrap();
    }

    #[test]
    fn ping_thread_sends_ping_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let client = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = CommandSender::start_ping_thread(
            Arc::clone(&client),
            server.local_addr().unwrap(),
            Arc::clone(&shutdown),
        )
        .unwrap();

        let mut buf = [0u8; 16];
        let (size, from) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..size], PING);
        assert_eq!(from, client.local_addr().unwrap());

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
