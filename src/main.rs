use esp_idf_sys as _; // If using the `binstart` feature of `esp-idf-sys`, always keep this module imported
use log::{info, warn, LevelFilter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use serial_bridge::{
    ble::{BleRadio, DEVICE_NAME},
    bridge::{Bridge, BridgeContext},
    engine::BridgeState,
    error::Result,
    log_sink::{RecentLines, SinkLogger},
    nus::NimbleStack,
    registry::BridgeRegistry,
    storage::NvsStore,
    uart::UartEndpoint,
    wifi::WifiLink,
};

/// Log lines kept for the status page
const RECENT_LOG_LINES: usize = 64;

fn main() -> anyhow::Result<()> {
    // Initialize the ESP-IDF system
    esp_idf_sys::link_patches();

    let recent = Arc::new(RecentLines::<RECENT_LOG_LINES>::new());
    let logger = SinkLogger::new(LevelFilter::Debug).with_sink(recent.clone());
    #[cfg(feature = "serial-debug")]
    let logger = logger.with_sink(Arc::new(serial_bridge::log_sink::ConsoleSink));
    logger.install()?;
    info!("Serial bridge starting up...");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let store = Arc::new(NvsStore::new(nvs.clone()));
    let wifi = Arc::new(WifiLink::new(peripherals.modem, sysloop, nvs, store.clone())?);
    let radio = Arc::new(BleRadio::new(Box::new(NimbleStack::new()), DEVICE_NAME));
    let ctx = BridgeContext::new(store.clone(), wifi.clone()).with_radio(radio);

    let mut registry = BridgeRegistry::new(store).with_wifi(wifi.clone());

    #[cfg(all(feature = "usb-cdc", not(feature = "serial-debug")))]
    {
        let usb = serial_bridge::uart::UsbCdcEndpoint::new(
            peripherals.usb_serial,
            peripherals.pins.gpio18,
            peripherals.pins.gpio19,
        )?;
        registry.add(Arc::new(Bridge::new("USB-Serial Bridge", "serial", usb, ctx.clone())));
    }

    let uart0 = UartEndpoint::new(
        peripherals.uart0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio20,
    )?;
    registry.add(Arc::new(Bridge::new("UART0 Bridge", "uart0", uart0, ctx)));

    start_all(&registry)?;
    info!("{} bridge(s) started", registry.len());

    wifi.bring_up()?;
    if let Err(e) = wifi.scan_networks() {
        warn!("WiFi scan failed: {}", e);
    }

    run_status_loop(&registry)
}

/// Report bridge state changes every few seconds
fn run_status_loop(registry: &BridgeRegistry) -> anyhow::Result<()> {
    let mut last: Vec<BridgeState> = registry.iter().map(|b| b.state()).collect();
    loop {
        thread::sleep(Duration::from_secs(5));

        for (bridge, previous) in registry.iter().zip(last.iter_mut()) {
            let state = bridge.state();
            if state != *previous {
                let stats = bridge.stats();
                info!(
                    "{} is {:?} ({} sessions, {} bytes in, {} bytes out)",
                    bridge.name(),
                    state,
                    stats.sessions,
                    stats.bytes_to_serial,
                    stats.bytes_to_network
                );
                *previous = state;
            }
        }
    }
}

fn start_all(registry: &BridgeRegistry) -> Result<()> {
    for bridge in registry.iter() {
        bridge.start()?;
    }
    Ok(())
}
