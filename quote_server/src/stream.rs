//! UDP push streams.
//!
//! One forwarding thread per push session drains the session queue and writes each
//! event to the client as a single JSON datagram.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use crossbeam_channel::{Receiver, select};
use log::debug;
use quote_common::{QuoteError, Result, ServerEvent};

use crate::sessions::SessionHandle;

/// A session opened through the control API, waiting for its forwarding thread.
#[derive(Debug)]
pub struct StreamRequest {
    /// Client UDP address.
    pub target: SocketAddr,
    /// Registered session.
    pub session: SessionHandle,
}

/// Forward `events` to `target` until `stop_rx` fires or the session queue closes.
///
/// A failed send ends the stream with `TransportDropped`.
pub fn handle_client_stream(
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    events: Receiver<ServerEvent>,
    stop_rx: Receiver<()>,
) -> Result<()> {
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(events) -> event => match event {
                Ok(event) => {
                    let data = event.to_json_bytes()?;
                    socket.send_to(&data, target).map_err(|e| {
                        QuoteError::TransportDropped(format!("send to {} failed: {}", target, e))
                    })?;
                }
                Err(_) => {
                    debug!("Session queue for {} closed", target);
                    break;
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote_common::net::MAX_DATAGRAM;
    use quote_common::{InstrumentId, Quote, ServerInfo};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn events_arrive_as_json_datagrams() {
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = client.local_addr().unwrap();

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let worker = thread::spawn(move || handle_client_stream(server, target, events_rx, stop_rx));

        let quote = Quote::from_move(InstrumentId::parse("rb2501").unwrap(), 3500.0, 3502.5);
        events_tx
            .send(ServerEvent::ServerInfo(ServerInfo::connected(1)))
            .unwrap();
        events_tx.send(ServerEvent::Quote(quote.clone())).unwrap();
        drop(events_tx);

        let mut buf = [0u8; MAX_DATAGRAM];
        let size = client.recv(&mut buf).unwrap();
        let greeting = ServerEvent::from_json_bytes(&buf[..size]).unwrap();
        assert!(matches!(greeting, ServerEvent::ServerInfo(_)));

        let size = client.recv(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf[..size]).unwrap();
        assert_eq!(value["event"], "quote");
        assert_eq!(value["data"]["instrumentId"], "rb2501");
        assert_eq!(value["data"]["change"], 2.5);

        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn stop_signal_ends_stream() {
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let target = server.local_addr().unwrap();
        let (_events_tx, events_rx) = crossbeam_channel::unbounded::<ServerEvent>();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        stop_tx.send(()).unwrap();

        assert!(handle_client_stream(server, target, events_rx, stop_rx).is_ok());
    }
}
