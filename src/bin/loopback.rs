//! Host-side bridge in front of an echoing in-memory device.
//!
//! `cargo run --bin loopback -- 4000` then `nc 127.0.0.1 4000`: every line
//! typed comes straight back through the bridge.

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use log::{info, LevelFilter};

use serial_bridge::config::{BridgeConfig, BridgeType};
use serial_bridge::log_sink::{ConsoleSink, SinkLogger};
use serial_bridge::storage::{self, MemoryStore};
use serial_bridge::{AlwaysUp, Bridge, BridgeContext, MemorySerial};

const DEFAULT_PORT: u16 = 3000;

fn main() -> anyhow::Result<()> {
    SinkLogger::new(LevelFilter::Debug)
        .with_sink(Arc::new(ConsoleSink))
        .install()?;

    let port = match env::args().nth(1) {
        Some(arg) => arg.parse().with_context(|| format!("Invalid port {:?}", arg))?,
        None => DEFAULT_PORT,
    };

    let store = Arc::new(MemoryStore::new());
    let config = BridgeConfig {
        bridge_type: BridgeType::TcpServer,
        port,
        ..BridgeConfig::default()
    };
    storage::try_save_bridge_config(&*store, "loopback", &config)?;

    let ctx = BridgeContext::new(store, Arc::new(AlwaysUp));
    let bridge = Bridge::new("Loopback Bridge", "loopback", MemorySerial::loopback(), ctx);
    bridge.start()?;
    info!("Echoing everything sent to port {}", port);

    let mut last = bridge.stats();
    loop {
        thread::sleep(Duration::from_secs(5));
        let stats = bridge.stats();
        if stats != last {
            info!("{:?} {:?}", bridge.state(), stats);
            last = stats;
        }
    }
}
