//! Transport module
//!
//! The capability set every bridge endpoint implements. The pump only ever
//! talks to these traits, so serial ports, sockets and BLE characteristics are
//! interchangeable on either side of it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;

use crate::config::SerialFormat;
use crate::error::Result;

/// A byte stream that can be polled without blocking
pub trait Endpoint {
    /// Number of bytes that can be read right now without blocking
    fn available(&mut self) -> usize;

    /// Read at most `buf.len()` bytes, returning how many were read
    fn read_up_to(&mut self, buf: &mut [u8]) -> usize;

    /// Best-effort write of the whole slice. An error means the endpoint is
    /// gone and the current session should end.
    fn write(&mut self, data: &[u8]) -> Result<()>;
}

impl<E: Endpoint + ?Sized> Endpoint for Box<E> {
    fn available(&mut self) -> usize {
        (**self).available()
    }

    fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
        (**self).read_up_to(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }
}

/// The network side of a bridge: an endpoint that can go away
pub trait Peer: Endpoint {
    /// False once the remote end is gone; the session ends on the next check
    fn is_connected(&self) -> bool;
}

/// The serial side of a bridge
///
/// Lives as long as the bridge; line settings are applied once per engine
/// start.
pub trait SerialPort: Endpoint + Send {
    fn configure(&mut self, baud: u32, format: SerialFormat) -> Result<()>;
}

impl<S: SerialPort + ?Sized> SerialPort for Box<S> {
    fn configure(&mut self, baud: u32, format: SerialFormat) -> Result<()> {
        (**self).configure(baud, format)
    }
}

#[derive(Debug, Default)]
struct MemoryLine {
    /// Bytes waiting to be read by the bridge
    incoming: VecDeque<u8>,
    /// Bytes the bridge wrote
    outgoing: Vec<u8>,
    /// Last line settings applied by the bridge
    settings: Option<(u32, SerialFormat)>,
}

/// In-memory serial endpoint
///
/// Stands in for a UART on hosts. In loopback mode everything written to it
/// comes straight back, like a device that echoes its input.
#[derive(Debug, Clone)]
pub struct MemorySerial {
    line: Arc<Mutex<MemoryLine>>,
    loopback: bool,
}

/// The device side of a [`MemorySerial`]
#[derive(Debug, Clone)]
pub struct MemorySerialHandle {
    line: Arc<Mutex<MemoryLine>>,
}

fn lock_line(line: &Mutex<MemoryLine>) -> MutexGuard<'_, MemoryLine> {
    // plain byte queues: a panic elsewhere can't leave them inconsistent
    line.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySerial {
    pub fn new() -> Self {
        Self {
            line: Arc::new(Mutex::new(MemoryLine::default())),
            loopback: false,
        }
    }

    /// Device that echoes everything back
    pub fn loopback() -> Self {
        Self {
            loopback: true,
            ..Self::new()
        }
    }

    pub fn handle(&self) -> MemorySerialHandle {
        MemorySerialHandle {
            line: Arc::clone(&self.line),
        }
    }
}

impl Default for MemorySerial {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint for MemorySerial {
    fn available(&mut self) -> usize {
        lock_line(&self.line).incoming.len()
    }

    fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
        let mut line = lock_line(&self.line);
        let n = buf.len().min(line.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(line.incoming.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut line = lock_line(&self.line);
        if self.loopback {
            line.incoming.extend(data);
        } else {
            line.outgoing.extend_from_slice(data);
        }
        trace!("memory serial took {} bytes", data.len());
        Ok(())
    }
}

impl SerialPort for MemorySerial {
    fn configure(&mut self, baud: u32, format: SerialFormat) -> Result<()> {
        lock_line(&self.line).settings = Some((baud, format));
        Ok(())
    }
}

impl MemorySerialHandle {
    /// Make bytes available to the bridge, as if the device sent them
    pub fn inject(&self, data: &[u8]) {
        lock_line(&self.line).incoming.extend(data);
    }

    /// Take everything the bridge wrote to the device so far
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut lock_line(&self.line).outgoing)
    }

    /// Bytes injected but not yet read by the bridge
    pub fn pending(&self) -> usize {
        lock_line(&self.line).incoming.len()
    }

    /// Line settings the bridge applied, if any
    pub fn settings(&self) -> Option<(u32, SerialFormat)> {
        lock_line(&self.line).settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_serial_moves_bytes_both_ways() {
        let mut serial = MemorySerial::new();
        let device = serial.handle();

        device.inject(b"hello");
        assert_eq!(serial.available(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(serial.read_up_to(&mut buf), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(serial.available(), 2);

        serial.write(b"world").unwrap();
        assert_eq!(device.take_written(), b"world");
        assert!(device.take_written().is_empty());
    }

    #[test]
    fn test_loopback_echoes_writes() {
        let mut serial = MemorySerial::loopback();
        serial.write(b"ping").unwrap();
        assert_eq!(serial.available(), 4);

        let mut buf = [0u8; 8];
        let n = serial.read_up_to(&mut buf);
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_configure_is_recorded() {
        let mut serial = MemorySerial::new();
        let device = serial.handle();
        assert_eq!(device.settings(), None);
        serial.configure(115_200, SerialFormat::F7E1).unwrap();
        assert_eq!(device.settings(), Some((115_200, SerialFormat::F7E1)));
    }
}
