//! Bridge module
//!
//! A bridge pairs one serial endpoint with a network or BLE transport. The
//! serial endpoint is fixed at construction; everything else comes from the
//! settings persisted under the bridge code and only takes effect the next
//! time the engine starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, error, info};

use crate::ble::BleRadio;
use crate::config::{BridgeConfig, BridgeType, EngineConfig, SerialFormat};
use crate::engine::{BridgeState, BridgeStats, BridgeStatus, Engine};
use crate::error::{Error, Result};
use crate::link::Connectivity;
use crate::storage::{self, KeyValueStore};
use crate::transport::SerialPort;

/// Collaborators every bridge needs, shared between bridges
#[derive(Clone)]
pub struct BridgeContext {
    pub store: Arc<dyn KeyValueStore>,
    pub link: Arc<dyn Connectivity>,
    /// `None` on builds without a BLE radio
    pub radio: Option<Arc<BleRadio>>,
    pub engine: EngineConfig,
}

impl BridgeContext {
    pub fn new(store: Arc<dyn KeyValueStore>, link: Arc<dyn Connectivity>) -> Self {
        Self {
            store,
            link,
            radio: None,
            engine: EngineConfig::default(),
        }
    }

    pub fn with_radio(mut self, radio: Arc<BleRadio>) -> Self {
        self.radio = Some(radio);
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

/// One serial port exposed over the network
pub struct Bridge {
    name: String,
    code: String,
    /// Handed to the engine on start
    serial: Mutex<Option<Box<dyn SerialPort>>>,
    config: Mutex<BridgeConfig>,
    ctx: BridgeContext,
    status: Arc<BridgeStatus>,
    started: AtomicBool,
}

impl Bridge {
    /// `code` is the persistence key and must be unique per store; `name` is
    /// only shown to the operator.
    pub fn new(name: &str, code: &str, serial: impl SerialPort + 'static, ctx: BridgeContext) -> Self {
        let config = storage::load_bridge_config(&*ctx.store, code);
        Self {
            name: name.to_string(),
            code: code.to_string(),
            serial: Mutex::new(Some(Box::new(serial))),
            config: Mutex::new(config),
            ctx,
            status: Arc::new(BridgeStatus::default()),
            started: AtomicBool::new(false),
        }
    }

    fn lock_config(&self) -> MutexGuard<'_, BridgeConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_serial(&self) -> MutexGuard<'_, Option<Box<dyn SerialPort>>> {
        self.serial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the persisted settings and spawn the engine thread.
    ///
    /// Only the first successful call does anything; the engine runs until
    /// reset. If the thread can't be spawned the bridge stays startable.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Bridge {} already started", self.code);
            return Ok(());
        }

        let result = self.spawn_engine();
        if result.is_err() {
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    fn spawn_engine(&self) -> Result<()> {
        let config = storage::load_bridge_config(&*self.ctx.store, &self.code);
        *self.lock_config() = config.clone();

        let serial = self
            .lock_serial()
            .take()
            .ok_or_else(|| Error::General(format!("Bridge {} has no serial port", self.code)))?;

        let thread_name = match config.bridge_type {
            BridgeType::TcpServer => "TcpServerBridge",
            BridgeType::TcpClient => "TcpClientBridge",
            BridgeType::Bluetooth => "BluetoothBridge",
            BridgeType::Ble => "BLEBridge",
        };
        let engine = Engine::new(
            &self.code,
            config,
            self.ctx.clone(),
            Arc::clone(&self.status),
            serial,
        );

        // the thread takes the engine out; a failed spawn leaves it here
        let slot = Arc::new(Mutex::new(Some(engine)));
        let handoff = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(thread_name.into())
            .stack_size(self.ctx.engine.stack_size)
            .spawn(move || {
                let engine = handoff.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(engine) = engine {
                    engine.run();
                }
            });

        if let Err(e) = spawned {
            error!("Failed to spawn {} for {}: {}", thread_name, self.code, e);
            if let Some(engine) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                *self.lock_serial() = Some(engine.into_serial());
            }
            return Err(Error::General(format!("Failed to spawn bridge thread: {}", e)));
        }

        info!("Bridge {} ({}) started", self.name, self.code);
        Ok(())
    }

    /// Persist new settings. A running engine keeps its current settings
    /// until the device restarts.
    pub fn set_config(&self, config: BridgeConfig) {
        storage::save_bridge_config(&*self.ctx.store, &self.code, &config);
        *self.lock_config() = config;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn config(&self) -> BridgeConfig {
        self.lock_config().clone()
    }

    pub fn bridge_type(&self) -> BridgeType {
        self.lock_config().bridge_type
    }

    pub fn host(&self) -> String {
        self.lock_config().host.clone()
    }

    pub fn port(&self) -> u16 {
        self.lock_config().port
    }

    pub fn baud(&self) -> u32 {
        self.lock_config().baud
    }

    pub fn serial_format(&self) -> SerialFormat {
        self.lock_config().serial_format
    }

    pub fn has_echo(&self) -> bool {
        self.lock_config().has_echo
    }

    pub fn simulate_echo(&self) -> bool {
        self.lock_config().simulate_echo
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BridgeState {
        self.status.state()
    }

    pub fn stats(&self) -> BridgeStats {
        self.status.stats()
    }
}
