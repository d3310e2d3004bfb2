//! Socket endpoint
//!
//! Wraps one accepted or dialed `TcpStream` for the lifetime of a single
//! connection. The stream runs in non-blocking mode; `available` pulls
//! whatever the stack has buffered into a small staging area.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use heapless::Vec;
use log::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::{Endpoint, Peer};

const STAGING_SIZE: usize = 512;

/// A connected TCP peer
pub struct SocketEndpoint {
    stream: TcpStream,
    peer: SocketAddr,
    staged: Vec<u8, STAGING_SIZE>,
    consumed: usize,
    open: bool,
    write_timeout: Duration,
}

impl SocketEndpoint {
    pub fn new(stream: TcpStream, write_timeout: Duration) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map_err(|e| Error::Tcp(format!("Failed to get peer address: {}", e)))?;
        stream
            .set_nonblocking(true)
            .map_err(|e| Error::Tcp(format!("Failed to set non-blocking mode for {}: {}", peer, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to disable Nagle for {}: {}", peer, e);
        }

        Ok(Self {
            stream,
            peer,
            staged: Vec::new(),
            consumed: 0,
            open: true,
            write_timeout,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn staged_len(&self) -> usize {
        self.staged.len() - self.consumed
    }

    fn fill(&mut self) {
        if !self.open || self.staged_len() > 0 {
            return;
        }
        self.staged.clear();
        self.consumed = 0;

        let mut chunk = [0u8; STAGING_SIZE];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                debug!("Peer {} closed the connection", self.peer);
                self.open = false;
            }
            Ok(n) => {
                // n <= STAGING_SIZE, always fits
                let _ = self.staged.extend_from_slice(&chunk[..n]);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                debug!("Error reading from {}: {}", self.peer, e);
                self.open = false;
            }
        }
    }

    fn close_with(&mut self, err: std::io::Error) -> Error {
        self.open = false;
        Error::Tcp(format!("Failed to write to {}: {}", self.peer, err))
    }
}

impl Endpoint for SocketEndpoint {
    fn available(&mut self) -> usize {
        self.fill();
        self.staged_len()
    }

    fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
        self.fill();
        let n = buf.len().min(self.staged_len());
        buf[..n].copy_from_slice(&self.staged[self.consumed..self.consumed + n]);
        self.consumed += n;
        n
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::Tcp(format!("Peer {} is gone", self.peer)));
        }

        let deadline = Instant::now() + self.write_timeout;
        let mut rest = data;
        while !rest.is_empty() {
            match self.stream.write(rest) {
                Ok(0) => {
                    return Err(self.close_with(ErrorKind::WriteZero.into()));
                }
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    // send buffer full: wait for the peer to catch up
                    if Instant::now() >= deadline {
                        return Err(self.close_with(ErrorKind::TimedOut.into()));
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(self.close_with(e)),
            }
        }

        if log::log_enabled!(log::Level::Trace) {
            trace!("TCP -> {}: {} bytes", self.peer, data.len());
        }
        Ok(())
    }
}

impl Peer for SocketEndpoint {
    /// False once the peer closed the connection or the socket failed
    fn is_connected(&self) -> bool {
        self.open
    }
}

impl Drop for SocketEndpoint {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
