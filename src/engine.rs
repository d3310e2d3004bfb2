//! Bridge engine
//!
//! One engine runs per bridge, on its own thread, for the life of the
//! process. It owns the serial endpoint and cycles the network side through
//! wait-for-link, listen/dial and pump states. Nothing in here returns an
//! error to a caller: every failure is logged and turns into a state change.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::bridge::BridgeContext;
use crate::config::{BridgeConfig, BridgeType};
use crate::pump::pump_cycle;
use crate::transport::{Peer, SerialPort};

/// Where a bridge engine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Not started yet
    Idle,
    /// No network / radio link
    WaitingLink,
    /// Server awaiting a client, client dialing, or BLE awaiting a peer
    ListeningOrDialing,
    ConnectedPumping,
    /// The bridge type needs hardware this build doesn't have
    Parked,
}

impl BridgeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BridgeState::WaitingLink,
            2 => BridgeState::ListeningOrDialing,
            3 => BridgeState::ConnectedPumping,
            4 => BridgeState::Parked,
            _ => BridgeState::Idle,
        }
    }
}

/// Snapshot of a bridge's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Outbound connect attempts (TCP client only)
    pub connect_attempts: u32,
    /// Sessions that reached the pumping state
    pub sessions: u32,
    /// Network -> serial, wraps at u32::MAX
    pub bytes_to_serial: u32,
    /// Serial -> network, wraps at u32::MAX
    pub bytes_to_network: u32,
}

/// Engine state shared with the bridge's accessors
#[derive(Debug, Default)]
pub(crate) struct BridgeStatus {
    state: AtomicU8,
    connect_attempts: AtomicU32,
    sessions: AtomicU32,
    bytes_to_serial: AtomicU32,
    bytes_to_network: AtomicU32,
}

impl BridgeStatus {
    pub(crate) fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn stats(&self) -> BridgeStats {
        BridgeStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            bytes_to_serial: self.bytes_to_serial.load(Ordering::Relaxed),
            bytes_to_network: self.bytes_to_network.load(Ordering::Relaxed),
        }
    }
}

/// Why a pumping session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    PeerGone,
    LinkLost,
    WriteFailed,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::PeerGone => f.write_str("peer disconnected"),
            SessionEnd::LinkLost => f.write_str("link lost"),
            SessionEnd::WriteFailed => f.write_str("write failed"),
        }
    }
}

pub(crate) struct Engine {
    /// Log prefix, e.g. `TcpServer(uart0)`
    pub(crate) tag: String,
    pub(crate) config: BridgeConfig,
    pub(crate) ctx: BridgeContext,
    status: Arc<BridgeStatus>,
    serial: Box<dyn SerialPort>,
    /// Private to this task, never shared
    buffer: Vec<u8>,
}

impl Engine {
    pub(crate) fn new(
        code: &str,
        config: BridgeConfig,
        ctx: BridgeContext,
        status: Arc<BridgeStatus>,
        serial: Box<dyn SerialPort>,
    ) -> Self {
        let kind = match config.bridge_type {
            BridgeType::TcpServer => "TcpServer",
            BridgeType::TcpClient => "TcpClient",
            BridgeType::Bluetooth => "Bluetooth",
            BridgeType::Ble => "BLE",
        };
        let buffer = vec![0u8; ctx.engine.buffer_size.max(1)];
        Self {
            tag: format!("{}({})", kind, code),
            config,
            ctx,
            status,
            serial,
            buffer,
        }
    }

    /// Give the serial port back to an engine that never got to run
    pub(crate) fn into_serial(self) -> Box<dyn SerialPort> {
        self.serial
    }

    /// Run the engine for the bridge type it was loaded with. Never returns.
    pub(crate) fn run(mut self) -> ! {
        info!("{} started task...", self.tag);

        if let Err(e) = self
            .serial
            .configure(self.config.baud, self.config.serial_format)
        {
            warn!("{} failed to initialise serial port: {}", self.tag, e);
        }

        match self.config.bridge_type {
            BridgeType::TcpServer => self.run_tcp_server(),
            BridgeType::TcpClient => self.run_tcp_client(),
            BridgeType::Bluetooth => self.park("Bluetooth classic is not supported by this device"),
            BridgeType::Ble => match self.ctx.radio.clone() {
                Some(radio) => self.run_ble(radio),
                None => self.park("BLE is not supported by this build"),
            },
        }
    }

    pub(crate) fn set_state(&self, state: BridgeState) {
        let previous = self.status.state.swap(state as u8, Ordering::AcqRel);
        if previous != state as u8 {
            debug!("{} -> {:?}", self.tag, state);
        }
    }

    pub(crate) fn count_connect_attempt(&self) {
        self.status.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn link_up(&self) -> bool {
        self.ctx.link.is_up()
    }

    /// Poll until the network link is up
    pub(crate) fn wait_for_link(&self) {
        if self.link_up() {
            return;
        }
        self.set_state(BridgeState::WaitingLink);
        info!("{} waiting for network...", self.tag);
        while !self.link_up() {
            thread::sleep(self.ctx.engine.link_poll);
        }
    }

    /// Pump bytes between `peer` and the serial port until something breaks
    pub(crate) fn pump_session<P: Peer + ?Sized>(&mut self, peer: &mut P) -> SessionEnd {
        self.set_state(BridgeState::ConnectedPumping);
        self.status.sessions.fetch_add(1, Ordering::Relaxed);
        let needs_link = self.config.bridge_type.needs_network();

        loop {
            if !peer.is_connected() {
                return SessionEnd::PeerGone;
            }
            if needs_link && !self.link_up() {
                return SessionEnd::LinkLost;
            }

            let cycle = pump_cycle(peer, &mut self.serial, &mut self.buffer);
            self.status
                .bytes_to_serial
                .fetch_add(cycle.forwarded() as u32, Ordering::Relaxed);
            self.status
                .bytes_to_network
                .fetch_add(cycle.returned() as u32, Ordering::Relaxed);

            if cycle.is_broken() {
                if let Err(e) = cycle.forward.as_ref().and(cycle.backward.as_ref()) {
                    debug!("{} {}", self.tag, e);
                }
                return SessionEnd::WriteFailed;
            }
            if cycle.is_idle() {
                thread::sleep(self.ctx.engine.idle_yield);
            }
        }
    }

    /// Dead end for bridge types this hardware can't serve
    pub(crate) fn park(&self, reason: &str) -> ! {
        self.set_state(BridgeState::Parked);
        error!("{} {}, parking task", self.tag, reason);
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }
}
