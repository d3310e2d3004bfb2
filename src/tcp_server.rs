//! TCP Server module
//!
//! Server side of a TCP bridge: listens on the configured port and serves one
//! client at a time. While a client is being served nobody else is accepted;
//! the listen queue holds a single waiting connection.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::thread;

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::engine::{BridgeState, Engine};
use crate::error::{Error, Result};
use crate::socket::SocketEndpoint;

/// Pending connections the listener keeps while a client is served
pub(crate) const LISTEN_BACKLOG: i32 = 1;

/// Non-blocking listener on `0.0.0.0:port` with a backlog of one
pub(crate) fn bind_listener(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::Tcp(format!("Failed to create socket: {}", e)))?;

    // rebinding right after link loss must not trip over TIME_WAIT
    socket
        .set_reuse_address(true)
        .map_err(|e| Error::Tcp(format!("Failed to set SO_REUSEADDR: {}", e)))?;
    socket
        .bind(&addr.into())
        .map_err(|e| Error::Tcp(format!("Failed to bind to port {}: {}", port, e)))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| Error::Tcp(format!("Failed to listen on port {}: {}", port, e)))?;

    // accept() has to poll so link loss is noticed while nobody connects
    socket
        .set_nonblocking(true)
        .map_err(|e| Error::Tcp(format!("Failed to set listener non-blocking: {}", e)))?;
    Ok(socket.into())
}

impl Engine {

    /// Serve clients forever, rebinding whenever the link comes back
    pub(crate) fn run_tcp_server(mut self) -> ! {
        loop {
            self.wait_for_link();

            let listener = match bind_listener(self.config.port) {
                Ok(listener) => listener,
                Err(e) => {
                    error!("{} {}", self.tag, e);
                    thread::sleep(self.ctx.engine.client_backoff);
                    continue;
                }
            };
            info!("{} listening on port {}", self.tag, self.config.port);
            self.set_state(BridgeState::ListeningOrDialing);

            self.accept_loop(&listener);
            info!("{} network lost, closing listener", self.tag);
        }
    }

    /// Accept and serve one client after another while the link holds
    fn accept_loop(&mut self, listener: &TcpListener) {
        while self.link_up() {
            let (stream, addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.ctx.engine.accept_poll);
                    continue;
                }
                Err(e) => {
                    debug!("{} accept failed: {}", self.tag, e);
                    thread::sleep(self.ctx.engine.accept_poll);
                    continue;
                }
            };

            let mut client = match SocketEndpoint::new(stream, self.ctx.engine.write_timeout) {
                Ok(client) => client,
                Err(e) => {
                    warn!("{} dropping client {}: {}", self.tag, addr, e);
                    continue;
                }
            };
            info!("{} accepted client from {}", self.tag, addr);

            let end = self.pump_session(&mut client);
            info!("{} client {} disconnected ({})", self.tag, addr, end);
            drop(client);

            thread::sleep(self.ctx.engine.reconnect_delay);
            self.set_state(BridgeState::ListeningOrDialing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::time::Duration;

    #[test]
    fn test_listener_is_nonblocking() {
        let listener = bind_listener(0).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_listener_rebinds_same_port() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let accepted = loop {
            match listener.accept() {
                Ok((stream, _)) => break stream,
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        };
        // server side closes first, leaving the port in TIME_WAIT
        drop(accepted);
        drop(client);
        drop(listener);

        assert!(bind_listener(port).is_ok());
    }

    #[test]
    fn test_listen_queue_holds_one_connection() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        // nobody accepts: attempts past the queue never finish the handshake
        let completed: Vec<_> = (0..6)
            .filter_map(|_| TcpStream::connect_timeout(&addr, Duration::from_millis(300)).ok())
            .collect();

        // Linux admits one more than the backlog
        assert!(!completed.is_empty());
        assert!(
            completed.len() <= LISTEN_BACKLOG as usize + 1,
            "{} connections queued",
            completed.len()
        );
    }
}
