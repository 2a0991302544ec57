//! Keep-alive plumbing on the UDP data socket.

use crate::model::ping_monitor::PingMonitor;
use crate::sessions::SessionId;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, warn};
use quote_common::Result;
use quote_common::net::{MAX_DATAGRAM, PING};
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lightweight UDP listener that receives PING datagrams from clients
/// and updates the shared `PingMonitor` with the sender address.
pub struct UdpPingListener;

impl UdpPingListener {
    /// Spawn a background thread that reads datagrams from `socket` and records a
    /// ping for the sender of every `PING`.
    pub fn start(socket: Arc<UdpSocket>, ping_monitor: Arc<Mutex<PingMonitor>>) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("ping-listener".to_string())
            .spawn(move || {
                let mut buf = [0u8; MAX_DATAGRAM];
                loop {
                    match socket.recv_from(&mut buf) {
                        Ok((size, addr)) if buf[..size].starts_with(PING) => {
                            let known = match ping_monitor.lock() {
                                Ok(mut monitor) => monitor.update_ping(addr),
                                Err(e) => {
                                    error!("Ping monitor lock poisoned: {}", e);
                                    return;
                                }
                            };
                            if known {
                                debug!("Received ping from {}", addr);
                            } else {
                                debug!("Ping from unknown client {}", addr);
                            }
                        }
                        Ok((size, addr)) => debug!("Ignoring {} byte datagram from {}", size, addr),
                        // ICMP port-unreachable from a vanished client surfaces here on some platforms.
                        Err(e) => debug!("UDP receive error: {}", e),
                    }
                }
            })?;
        Ok(handle)
    }
}

/// Spawn a thread that expires silent clients every `interval` and reports them on
/// `timeouts`. It exits once `stop_rx` fires or `timeouts` is closed.
pub fn start_ping_checker(
    ping_monitor: Arc<Mutex<PingMonitor>>,
    interval: Duration,
    timeouts: Sender<(SocketAddr, SessionId)>,
    stop_rx: Receiver<()>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("ping-checker".to_string())
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let timed_out = match ping_monitor.lock() {
                    Ok(mut monitor) => monitor.check_timeouts(),
                    Err(e) => {
                        error!("Ping monitor lock poisoned: {}", e);
                        break;
                    }
                };
                for client in timed_out {
                    if let Err(e) = timeouts.send(client) {
                        warn!("Error sending timeout notification: {}", e);
                        return;
                    }
                }
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn ping_keeps_registered_client_alive() {
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client_addr = client.local_addr().unwrap();
        let monitor = Arc::new(Mutex::new(PingMonitor::new(Duration::from_millis(250))));
        monitor.lock().unwrap().register(client_addr, 3);
        UdpPingListener::start(Arc::clone(&server), Arc::clone(&monitor)).unwrap();

        thread::sleep(Duration::from_millis(200));
        client.send_to(PING, server.local_addr().unwrap()).unwrap();
        thread::sleep(Duration::from_millis(100));

        let timed_out = monitor.lock().unwrap().check_timeouts();
        assert!(timed_out.is_empty());
    }

    #[test]
    fn checker_reports_silent_sessions() {
        let monitor = Arc::new(Mutex::new(PingMonitor::new(Duration::from_millis(30))));
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        monitor.lock().unwrap().register(addr, 9);
        let (timeouts_tx, timeouts_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let checker =
            start_ping_checker(Arc::clone(&monitor), Duration::from_millis(10), timeouts_tx, stop_rx)
                .unwrap();

        assert_eq!(
            timeouts_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            (addr, 9)
        );
        assert!(wait_for(|| !monitor.lock().unwrap().is_client_active(&addr)));
        stop_tx.send(()).unwrap();
        checker.join().unwrap();
    }
}
