//! BLE radio
//!
//! The radio stack is process-wide: however many BLE bridges exist, it gets
//! initialised exactly once. Every bridge then opens its own Nordic UART
//! style link on top of it.

use std::sync::{Arc, Mutex};
use std::thread;

use log::{info, warn};

use crate::engine::{BridgeState, Engine};
use crate::error::{Error, Result};
use crate::transport::Peer;

/// Name the device advertises under
pub const DEVICE_NAME: &str = "Serial Bridge";

/// A serial-like link over a GATT service. Connected means a peer is
/// connected and subscribed to notifications.
pub trait BleLink: Peer + Send {}

/// The platform BLE stack
pub trait RadioStack: Send + Sync {
    /// Bring the radio up and start advertising. Called at most once.
    fn initialize(&self, device_name: &str) -> Result<()>;

    /// Register one more UART service and hand back its link
    fn open_uart(&self) -> Result<Box<dyn BleLink>>;
}

/// Owner of the radio stack, shared by every BLE bridge in the process
pub struct BleRadio {
    stack: Box<dyn RadioStack>,
    device_name: String,
    initialized: Mutex<bool>,
}

impl BleRadio {
    pub fn new(stack: Box<dyn RadioStack>, device_name: &str) -> Self {
        Self {
            stack,
            device_name: device_name.to_string(),
            initialized: Mutex::new(false),
        }
    }

    /// Initialise the stack unless some bridge already did
    pub fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self
            .initialized
            .lock()
            .map_err(|_| Error::Ble("Failed to lock radio state".to_string()))?;
        if *initialized {
            return Ok(());
        }

        self.stack.initialize(&self.device_name)?;
        *initialized = true;
        info!("BLE radio up, advertising as {}", self.device_name);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.lock().map(|g| *g).unwrap_or(false)
    }

    /// Open a UART link, initialising the radio first if needed
    pub fn open_uart(&self) -> Result<Box<dyn BleLink>> {
        self.ensure_initialized()?;
        self.stack.open_uart()
    }
}

impl Engine {
    /// Wait for a BLE peer, pump until it leaves, wait again
    pub(crate) fn run_ble(mut self, radio: Arc<BleRadio>) -> ! {
        self.set_state(BridgeState::WaitingLink);
        let mut link = loop {
            match radio.open_uart() {
                Ok(link) => break link,
                Err(Error::Unsupported(reason)) => self.park(&reason),
                Err(e) => {
                    warn!("{} {}", self.tag, e);
                    thread::sleep(self.ctx.engine.ble_poll);
                }
            }
        };

        loop {
            self.set_state(BridgeState::ListeningOrDialing);
            while !link.is_connected() {
                thread::sleep(self.ctx.engine.ble_poll);
            }
            info!("{} connected to peer", self.tag);

            let end = self.pump_session(&mut *link);
            info!("{} {}", self.tag, end);
        }
    }
}
