//! TCP Client module
//!
//! Client side of a TCP bridge: dials the configured host and keeps dialing.
//! Failed attempts back off for a fixed interval; a lost connection is
//! re-dialed after a short delay.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::engine::{BridgeState, Engine};
use crate::error::{Error, Result};
use crate::socket::SocketEndpoint;

/// Try each address in turn; the error is the last one seen
pub(crate) fn connect_any<I>(addrs: I, timeout: Duration) -> io::Result<TcpStream>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "no addresses to connect to")
    }))
}

impl Engine {
    fn dial(&self) -> Result<SocketEndpoint> {
        self.count_connect_attempt();

        let host = self.config.host.trim();
        let port = self.config.port;
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Tcp(format!("Failed to resolve {}:{}: {}", host, port, e)))?;

        let stream = connect_any(addrs, self.ctx.engine.connect_timeout)
            .map_err(|e| Error::Tcp(format!("Failed to connect to {}:{}: {}", host, port, e)))?;
        SocketEndpoint::new(stream, self.ctx.engine.write_timeout)
    }

    /// Dial, pump, re-dial, forever
    pub(crate) fn run_tcp_client(mut self) -> ! {
        loop {
            self.wait_for_link();
            self.set_state(BridgeState::ListeningOrDialing);

            let mut server = match self.dial() {
                Ok(server) => server,
                Err(e) => {
                    info!("{} {}", self.tag, e);
                    thread::sleep(self.ctx.engine.client_backoff);
                    continue;
                }
            };
            info!(
                "{} connected to {}:{}",
                self.tag, self.config.host, self.config.port
            );

            let end = self.pump_session(&mut server);
            info!("{} connection lost ({})", self.tag, end);
            drop(server);

            thread::sleep(self.ctx.engine.reconnect_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn refused_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn test_connect_any_skips_unreachable_addresses() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let live = listener.local_addr().unwrap();

        let stream = connect_any([refused_addr(), live], TIMEOUT).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live);
    }

    #[test]
    fn test_connect_any_reports_last_error() {
        let err = connect_any([refused_addr(), refused_addr()], TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_connect_any_without_addresses() {
        let err = connect_any(Vec::<SocketAddr>::new(), TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_connect_any_accepts_resolved_hosts() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let addrs = ("127.0.0.1", port).to_socket_addrs().unwrap();
        assert!(connect_any(addrs, TIMEOUT).is_ok());
    }
}
