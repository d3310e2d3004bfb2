//! Pump module
//!
//! Moves bytes between two endpoints. A drain keeps reading buffer-sized
//! chunks until the source reports nothing available, so a burst larger than
//! the buffer goes through in a single pass.

use log::trace;

use crate::error::Result;
use crate::transport::Endpoint;

/// Forward everything `from` has available right now into `to`.
///
/// Stops at the first failed write; bytes still queued in `from` stay there.
pub fn drain<A, B>(from: &mut A, to: &mut B, buf: &mut [u8]) -> Result<usize>
where
    A: Endpoint + ?Sized,
    B: Endpoint + ?Sized,
{
    let mut total = 0;
    let mut avail = from.available();
    while avail > 0 {
        let want = avail.min(buf.len());
        let got = from.read_up_to(&mut buf[..want]);
        if got == 0 {
            break;
        }
        to.write(&buf[..got])?;
        total += got;
        avail = from.available();
    }
    Ok(total)
}

/// Outcome of one pump cycle
#[derive(Debug)]
pub struct Cycle {
    /// Bytes forwarded from the first endpoint to the second
    pub forward: Result<usize>,
    /// Bytes forwarded from the second endpoint back to the first
    pub backward: Result<usize>,
}

impl Cycle {
    /// A write failed in at least one direction
    pub fn is_broken(&self) -> bool {
        self.forward.is_err() || self.backward.is_err()
    }

    /// Nothing moved in either direction
    pub fn is_idle(&self) -> bool {
        matches!((&self.forward, &self.backward), (Ok(0), Ok(0)))
    }

    pub fn forwarded(&self) -> usize {
        *self.forward.as_ref().unwrap_or(&0)
    }

    pub fn returned(&self) -> usize {
        *self.backward.as_ref().unwrap_or(&0)
    }
}

/// Drain `a` into `b`, then `b` into `a`.
///
/// Both directions always run, so a dead writer on one side doesn't hold back
/// bytes that were already flowing the other way.
pub fn pump_cycle<A, B>(a: &mut A, b: &mut B, buf: &mut [u8]) -> Cycle
where
    A: Endpoint + ?Sized,
    B: Endpoint + ?Sized,
{
    let forward = drain(a, b, buf);
    let backward = drain(b, a, buf);
    let cycle = Cycle { forward, backward };
    if log::log_enabled!(log::Level::Trace) && !cycle.is_idle() {
        trace!("pump cycle: {} -> / <- {}", cycle.forwarded(), cycle.returned());
    }
    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::MemorySerial;

    /// Source that only reveals `step` bytes per availability check
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Endpoint for Trickle {
        fn available(&mut self) -> usize {
            (self.data.len() - self.pos).min(self.step)
        }

        fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.available());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            n
        }

        fn write(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    /// Sink that accepts `budget` writes and then fails
    struct Failing {
        accepted: Vec<u8>,
        budget: usize,
        queued: Vec<u8>,
    }

    impl Endpoint for Failing {
        fn available(&mut self) -> usize {
            self.queued.len()
        }

        fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.queued.len());
            buf[..n].copy_from_slice(&self.queued[..n]);
            self.queued.drain(..n);
            n
        }

        fn write(&mut self, data: &[u8]) -> Result<()> {
            if self.budget == 0 {
                return Err(Error::Tcp("peer reset".to_string()));
            }
            self.budget -= 1;
            self.accepted.extend_from_slice(data);
            Ok(())
        }
    }

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_drain_forwards_everything_in_order() {
        const CAP: usize = 64;
        for n in [0, 1, CAP - 1, CAP, CAP + 1, 3 * CAP, 5 * CAP + 7] {
            let mut source = MemorySerial::new();
            source.handle().inject(&pattern(n));
            let mut sink = MemorySerial::new();
            let sink_device = sink.handle();
            let mut buf = [0u8; CAP];

            let moved = drain(&mut source, &mut sink, &mut buf).unwrap();

            assert_eq!(moved, n);
            assert_eq!(sink_device.take_written(), pattern(n));
            assert_eq!(source.available(), 0);
        }
    }

    #[test]
    fn test_drain_keeps_polling_until_source_is_empty() {
        let mut source = Trickle {
            data: pattern(1000),
            pos: 0,
            step: 7,
        };
        let mut sink = MemorySerial::new();
        let device = sink.handle();
        let mut buf = [0u8; 16];

        assert_eq!(drain(&mut source, &mut sink, &mut buf).unwrap(), 1000);
        assert_eq!(device.take_written(), pattern(1000));
    }

    #[test]
    fn test_cycle_moves_both_directions() {
        let mut a = MemorySerial::new();
        let mut b = MemorySerial::new();
        let (a_dev, b_dev) = (a.handle(), b.handle());
        a_dev.inject(&pattern(1500));
        b_dev.inject(b"reply");
        let mut buf = [0u8; 512];

        let cycle = pump_cycle(&mut a, &mut b, &mut buf);

        assert!(!cycle.is_broken());
        assert_eq!(cycle.forwarded(), 1500);
        assert_eq!(cycle.returned(), 5);
        assert_eq!(b_dev.take_written(), pattern(1500));
        assert_eq!(a_dev.take_written(), b"reply");

        let idle = pump_cycle(&mut a, &mut b, &mut buf);
        assert!(idle.is_idle());
    }

    #[test]
    fn test_failed_direction_does_not_starve_the_other() {
        let mut serial = MemorySerial::new();
        let serial_dev = serial.handle();
        serial_dev.inject(&pattern(300));

        let mut peer = Failing {
            accepted: Vec::new(),
            budget: 0,
            queued: b"from peer".to_vec(),
        };
        let mut buf = [0u8; 128];

        let cycle = pump_cycle(&mut serial, &mut peer, &mut buf);

        assert!(cycle.is_broken());
        assert!(cycle.forward.is_err());
        // the reverse direction still delivered, untouched
        assert_eq!(cycle.returned(), 9);
        assert_eq!(serial_dev.take_written(), b"from peer");
        // the chunk that failed to write is gone, the rest is still queued
        assert_eq!(serial_dev.pending(), 300 - 128);
    }

    #[test]
    fn test_partial_failure_keeps_accepted_prefix() {
        let mut serial = MemorySerial::new();
        serial.handle().inject(&pattern(400));
        let mut peer = Failing {
            accepted: Vec::new(),
            budget: 2,
            queued: Vec::new(),
        };
        let mut buf = [0u8; 100];

        assert!(drain(&mut serial, &mut peer, &mut buf).is_err());
        assert_eq!(peer.accepted, pattern(200));
    }
}
