// Serial port to network bridge
pub mod ble;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod log_sink;
pub mod mdns;
pub mod pump;
pub mod registry;
pub mod socket;
pub mod storage;
pub mod tcp_client;
pub mod tcp_server;
pub mod transport;

#[cfg(feature = "esp32")]
pub mod nus;
#[cfg(feature = "esp32")]
pub mod uart;
#[cfg(feature = "esp32")]
pub mod wifi;

// Re-export the types most callers need straight from the crate root
pub use ble::{BleLink, BleRadio, RadioStack, DEVICE_NAME};
pub use bridge::{Bridge, BridgeContext};
pub use config::{BridgeConfig, BridgeType, EngineConfig, SerialFormat, WifiSettings};
pub use engine::{BridgeState, BridgeStats};
pub use error::{Error, Result};
pub use link::{AlwaysUp, Connectivity, SharedLink};
pub use registry::{BridgeForm, BridgeRegistry, WifiConnector, WifiForm};
pub use storage::{KeyValueStore, MemoryStore};
pub use transport::{Endpoint, MemorySerial, MemorySerialHandle, Peer, SerialPort};
