//! Nordic UART Service over NimBLE
//!
//! Every BLE bridge gets its own instance of the service: the peer writes to
//! RX to send bytes to the serial port and subscribes to TX to receive them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{uuid128, BLEAdvertisementData, BLECharacteristic, BLEDevice, NimbleProperties};
use log::{debug, info, warn};

use crate::ble::{BleLink, RadioStack};
use crate::error::{Error, Result};
use crate::transport::{Endpoint, Peer};

const NUS_SERVICE_UUID: BleUuid = uuid128!("6E400001-B5A3-F393-E0A9-E50E24DCCA9E");
const NUS_RX_UUID: BleUuid = uuid128!("6E400002-B5A3-F393-E0A9-E50E24DCCA9E");
const NUS_TX_UUID: BleUuid = uuid128!("6E400003-B5A3-F393-E0A9-E50E24DCCA9E");

/// Bytes per notification with the default MTU
const NOTIFY_CHUNK: usize = 20;

/// Received bytes kept while the serial side catches up
const INBOX_LIMIT: usize = 4096;

fn ble_error(context: &str, e: impl std::fmt::Debug) -> Error {
    Error::Ble(format!("{}: {:?}", context, e))
}

/// The NimBLE host stack on the ESP32 radio
#[derive(Debug, Default)]
pub struct NimbleStack {
    device_name: Mutex<String>,
}

impl NimbleStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn advertise(&self) -> Result<()> {
        let name = self
            .device_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let device = BLEDevice::take();
        let mut advertising = device.get_advertising().lock();

        // restart so the newly added service is part of the advertisement
        let _ = advertising.stop();
        advertising
            .set_data(
                BLEAdvertisementData::new()
                    .name(&name)
                    .add_service_uuid(NUS_SERVICE_UUID),
            )
            .map_err(|e| ble_error("Failed to set advertisement", e))?;
        advertising
            .start()
            .map_err(|e| ble_error("Failed to start advertising", e))
    }
}

impl RadioStack for NimbleStack {
    fn initialize(&self, device_name: &str) -> Result<()> {
        // take() brings the host up; the GAP name has to be set after that
        let device = BLEDevice::take();
        BLEDevice::set_device_name(device_name)
            .map_err(|e| ble_error("Failed to set device name", e))?;
        *self
            .device_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = device_name.to_string();

        let server = device.get_server();
        server.advertise_on_disconnect(true);
        server.on_connect(|_server, desc| {
            info!("BLE peer {:?} connected", desc.address());
        });
        server.on_disconnect(|desc, reason| {
            info!("BLE peer {:?} disconnected ({:?})", desc.address(), reason);
        });
        Ok(())
    }

    fn open_uart(&self) -> Result<Box<dyn BleLink>> {
        let server = BLEDevice::take().get_server();
        let service = server.create_service(NUS_SERVICE_UUID);

        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let rx = service.lock().create_characteristic(
            NUS_RX_UUID,
            NimbleProperties::WRITE | NimbleProperties::WRITE_NO_RSP,
        );
        let rx_inbox = Arc::clone(&inbox);
        rx.lock().on_write(move |args| {
            let mut inbox = rx_inbox.lock().unwrap_or_else(PoisonError::into_inner);
            let data = args.recv_data();
            let room = INBOX_LIMIT.saturating_sub(inbox.len());
            if data.len() > room {
                warn!("BLE inbox full, dropping {} bytes", data.len() - room);
            }
            inbox.extend(&data[..data.len().min(room)]);
        });

        let subscribed = Arc::new(AtomicBool::new(false));
        let tx = service
            .lock()
            .create_characteristic(NUS_TX_UUID, NimbleProperties::NOTIFY);
        let tx_subscribed = Arc::clone(&subscribed);
        tx.lock().on_subscribe(move |_characteristic, _desc, sub| {
            tx_subscribed.store(!sub.is_empty(), Ordering::Release);
        });

        self.advertise()?;
        debug!("Nordic UART service registered");

        Ok(Box::new(NusLink {
            inbox,
            tx,
            subscribed,
        }))
    }
}

struct NusLink {
    inbox: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<NimbleMutex<BLECharacteristic>>,
    subscribed: Arc<AtomicBool>,
}

impl Endpoint for NusLink {
    fn available(&mut self) -> usize {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        let n = buf.len().min(inbox.len());
        for (slot, byte) in buf.iter_mut().zip(inbox.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Ble("No subscribed peer".to_string()));
        }
        for chunk in data.chunks(NOTIFY_CHUNK) {
            self.tx.lock().set_value(chunk).notify();
        }
        Ok(())
    }
}

impl Peer for NusLink {
    fn is_connected(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
            && BLEDevice::take().get_server().connected_count() > 0
    }
}

impl BleLink for NusLink {}
