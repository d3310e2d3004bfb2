//! Storage module
//!
//! Persists bridge settings and WiFi credentials in a namespaced key/value
//! store: NVS on the device, a map in memory everywhere else. Loading never
//! fails; whatever can't be read falls back to the defaults.

use std::collections::HashMap;
use std::sync::Mutex;

use log::{info, warn};

use crate::config::{BridgeConfig, BridgeType, SerialFormat, WifiSettings};
use crate::error::{Error, Result};

const KEY_TYPE: &str = "type";
const KEY_HOST: &str = "host";
const KEY_PORT: &str = "port";
const KEY_BAUD: &str = "baud";
const KEY_FORMAT: &str = "fmt";
const KEY_HAS_ECHO: &str = "hecho";
const KEY_SIMULATE_ECHO: &str = "secho";

/// Namespace holding the WiFi credentials
pub const WIFI_NAMESPACE: &str = "wifi";
const KEY_SSID: &str = "ssid";
const KEY_PASS: &str = "pass";
const KEY_HOSTNAME: &str = "hostname";

/// Typed key/value store split into namespaces
///
/// Implementations serialise concurrent access themselves: a bridge task
/// reads while the UI task writes. Booleans are stored as `u8`.
pub trait KeyValueStore: Send + Sync {
    fn get_u8(&self, namespace: &str, key: &str) -> Result<Option<u8>>;
    fn get_u16(&self, namespace: &str, key: &str) -> Result<Option<u16>>;
    fn get_u32(&self, namespace: &str, key: &str) -> Result<Option<u32>>;
    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<()>;
    fn set_u16(&self, namespace: &str, key: &str, value: u16) -> Result<()>;
    fn set_u32(&self, namespace: &str, key: &str, value: u32) -> Result<()>;
    fn set_str(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
enum Stored {
    U8(u8),
    U16(u16),
    U32(u32),
    Str(String),
}

/// Store kept in RAM, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), Stored>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Stored>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("Failed to lock memory store".to_string()))?;
        Ok(entries.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: Stored) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("Failed to lock memory store".to_string()))?;
        entries.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}

fn type_mismatch(namespace: &str, key: &str) -> Error {
    Error::Storage(format!("{}/{} holds a different type", namespace, key))
}

impl KeyValueStore for MemoryStore {
    fn get_u8(&self, namespace: &str, key: &str) -> Result<Option<u8>> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(Stored::U8(v)) => Ok(Some(v)),
            Some(_) => Err(type_mismatch(namespace, key)),
        }
    }

    fn get_u16(&self, namespace: &str, key: &str) -> Result<Option<u16>> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(Stored::U16(v)) => Ok(Some(v)),
            Some(_) => Err(type_mismatch(namespace, key)),
        }
    }

    fn get_u32(&self, namespace: &str, key: &str) -> Result<Option<u32>> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(Stored::U32(v)) => Ok(Some(v)),
            Some(_) => Err(type_mismatch(namespace, key)),
        }
    }

    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        match self.get(namespace, key)? {
            None => Ok(None),
            Some(Stored::Str(v)) => Ok(Some(v)),
            Some(_) => Err(type_mismatch(namespace, key)),
        }
    }

    fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<()> {
        self.set(namespace, key, Stored::U8(value))
    }

    fn set_u16(&self, namespace: &str, key: &str, value: u16) -> Result<()> {
        self.set(namespace, key, Stored::U16(value))
    }

    fn set_u32(&self, namespace: &str, key: &str, value: u32) -> Result<()> {
        self.set(namespace, key, Stored::U32(value))
    }

    fn set_str(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.set(namespace, key, Stored::Str(value.to_string()))
    }
}

/// Reads one namespace field by field, remembering what went wrong
struct NamespaceReader<'a> {
    store: &'a dyn KeyValueStore,
    namespace: &'a str,
    found: usize,
    failure: Option<Error>,
}

impl<'a> NamespaceReader<'a> {
    fn new(store: &'a dyn KeyValueStore, namespace: &'a str) -> Self {
        Self {
            store,
            namespace,
            found: 0,
            failure: None,
        }
    }

    fn read<T>(
        &mut self,
        key: &str,
        default: T,
        get: impl Fn(&dyn KeyValueStore, &str, &str) -> Result<Option<T>>,
    ) -> T {
        match get(self.store, self.namespace, key) {
            Ok(Some(value)) => {
                self.found += 1;
                value
            }
            Ok(None) => default,
            Err(e) => {
                if self.failure.is_none() {
                    self.failure = Some(e);
                }
                default
            }
        }
    }

    fn u8(&mut self, key: &str, default: u8) -> u8 {
        self.read(key, default, |s, ns, k| s.get_u8(ns, k))
    }

    fn u16(&mut self, key: &str, default: u16) -> u16 {
        self.read(key, default, |s, ns, k| s.get_u16(ns, k))
    }

    fn u32(&mut self, key: &str, default: u32) -> u32 {
        self.read(key, default, |s, ns, k| s.get_u32(ns, k))
    }

    fn bool(&mut self, key: &str, default: bool) -> bool {
        self.u8(key, default as u8) != 0
    }

    fn string(&mut self, key: &str, default: &str) -> String {
        self.read(key, default.to_string(), |s, ns, k| s.get_str(ns, k))
    }

    /// Warn about anything that made the load fall back to defaults
    fn report(&self) {
        if let Some(e) = &self.failure {
            warn!("Unable to load {} settings: {}", self.namespace, e);
        } else if self.found == 0 {
            warn!("No stored {} settings, using defaults", self.namespace);
        }
    }
}

/// Load the settings persisted under a bridge code.
///
/// Missing, unreadable or out-of-range fields take their default value.
pub fn load_bridge_config(store: &dyn KeyValueStore, code: &str) -> BridgeConfig {
    let defaults = BridgeConfig::default();
    let mut reader = NamespaceReader::new(store, code);

    let raw_type = reader.u8(KEY_TYPE, defaults.bridge_type.as_u8());
    let host = reader.string(KEY_HOST, &defaults.host);
    let port = reader.u16(KEY_PORT, defaults.port);
    let baud = reader.u32(KEY_BAUD, defaults.baud);
    let raw_format = reader.u8(KEY_FORMAT, defaults.serial_format.as_u8());
    let has_echo = reader.bool(KEY_HAS_ECHO, defaults.has_echo);
    let simulate_echo = reader.bool(KEY_SIMULATE_ECHO, defaults.simulate_echo);
    reader.report();

    let bridge_type = BridgeType::from_u8(raw_type);
    if bridge_type.as_u8() != raw_type {
        warn!("{}: stored bridge type {} is out of range, using {}", code, raw_type, bridge_type);
    }
    let serial_format = SerialFormat::from_u8(raw_format);
    if serial_format.as_u8() != raw_format {
        warn!("{}: stored serial format {} is out of range, using {}", code, raw_format, serial_format);
    }

    let config = BridgeConfig {
        bridge_type,
        host,
        port,
        baud,
        serial_format,
        has_echo,
        simulate_echo,
    };
    info!("Loaded {} settings", code);
    log_bridge_config(&config);
    config
}

/// Persist the settings of a bridge, reporting the first failed write
pub fn try_save_bridge_config(store: &dyn KeyValueStore, code: &str, config: &BridgeConfig) -> Result<()> {
    store.set_u8(code, KEY_TYPE, config.bridge_type.as_u8())?;
    store.set_str(code, KEY_HOST, &config.host)?;
    store.set_u16(code, KEY_PORT, config.port)?;
    store.set_u32(code, KEY_BAUD, config.baud)?;
    store.set_u8(code, KEY_FORMAT, config.serial_format.as_u8())?;
    store.set_u8(code, KEY_HAS_ECHO, config.has_echo as u8)?;
    store.set_u8(code, KEY_SIMULATE_ECHO, config.simulate_echo as u8)?;
    Ok(())
}

/// Persist the settings of a bridge; failures are logged, not returned
pub fn save_bridge_config(store: &dyn KeyValueStore, code: &str, config: &BridgeConfig) {
    info!("Saving {} settings", code);
    log_bridge_config(config);
    if let Err(e) = try_save_bridge_config(store, code, config) {
        warn!("Unable to save {} settings: {}", code, e);
    }
}

fn log_bridge_config(config: &BridgeConfig) {
    info!("Type: {}", config.bridge_type);
    info!("Host: {}", config.host);
    info!("Port: {}", config.port);
    info!("Baud: {}", config.baud);
    info!("Fmt: {}", config.serial_format);
    info!("Has Echo: {}", config.has_echo);
    info!("Simulate Echo: {}", config.simulate_echo);
}

fn bounded<const N: usize>(field: &str, value: String, default: &str) -> heapless::String<N> {
    heapless::String::try_from(value.as_str()).unwrap_or_else(|_| {
        warn!("Stored WiFi {} exceeds {} bytes, ignoring it", field, N);
        heapless::String::try_from(default).unwrap_or_default()
    })
}

/// Load the WiFi credentials; anything missing takes its default
pub fn load_wifi_settings(store: &dyn KeyValueStore) -> WifiSettings {
    let defaults = WifiSettings::default();
    let mut reader = NamespaceReader::new(store, WIFI_NAMESPACE);

    let ssid = reader.string(KEY_SSID, &defaults.ssid);
    let pass = reader.string(KEY_PASS, &defaults.pass);
    let hostname = reader.string(KEY_HOSTNAME, &defaults.hostname);
    reader.report();

    WifiSettings {
        ssid: bounded("ssid", ssid, &defaults.ssid),
        pass: bounded("password", pass, &defaults.pass),
        hostname: bounded("hostname", hostname, &defaults.hostname),
    }
}

pub fn try_save_wifi_settings(store: &dyn KeyValueStore, settings: &WifiSettings) -> Result<()> {
    store.set_str(WIFI_NAMESPACE, KEY_SSID, &settings.ssid)?;
    store.set_str(WIFI_NAMESPACE, KEY_PASS, &settings.pass)?;
    store.set_str(WIFI_NAMESPACE, KEY_HOSTNAME, &settings.hostname)?;
    Ok(())
}

/// Persist the WiFi credentials; failures are logged, not returned
pub fn save_wifi_settings(store: &dyn KeyValueStore, settings: &WifiSettings) {
    info!("Saving WiFi settings for SSID {}", settings.ssid);
    if let Err(e) = try_save_wifi_settings(store, settings) {
        warn!("Unable to save WiFi settings: {}", e);
    }
}

#[cfg(feature = "esp32")]
pub use nvs::NvsStore;

#[cfg(feature = "esp32")]
mod nvs {
    use std::sync::Mutex;

    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

    use super::KeyValueStore;
    use crate::error::{Error, Result};

    /// Longest string value read back from NVS
    const MAX_STR_LEN: usize = 128;

    /// NVS-backed store on the default partition
    ///
    /// Each call opens the namespace, does its work and closes it again. One
    /// lock serialises the lot so readers never see a half-written namespace
    /// handle.
    pub struct NvsStore {
        partition: EspDefaultNvsPartition,
        lock: Mutex<()>,
    }

    impl NvsStore {
        pub fn new(partition: EspDefaultNvsPartition) -> Self {
            Self {
                partition,
                lock: Mutex::new(()),
            }
        }

        fn with_namespace<T>(
            &self,
            namespace: &str,
            read_write: bool,
            f: impl FnOnce(&mut EspNvs<NvsDefault>) -> std::result::Result<T, esp_idf_sys::EspError>,
        ) -> Result<T> {
            let _guard = self
                .lock
                .lock()
                .map_err(|_| Error::Storage("Failed to lock NVS".to_string()))?;
            let mut nvs = EspNvs::new(self.partition.clone(), namespace, read_write)
                .map_err(|e| Error::Storage(format!("Failed to open NVS namespace {}: {}", namespace, e)))?;
            f(&mut nvs).map_err(|e| Error::Storage(format!("NVS access to {} failed: {}", namespace, e)))
        }
    }

    impl KeyValueStore for NvsStore {
        fn get_u8(&self, namespace: &str, key: &str) -> Result<Option<u8>> {
            self.with_namespace(namespace, false, |nvs| nvs.get_u8(key))
        }

        fn get_u16(&self, namespace: &str, key: &str) -> Result<Option<u16>> {
            self.with_namespace(namespace, false, |nvs| nvs.get_u16(key))
        }

        fn get_u32(&self, namespace: &str, key: &str) -> Result<Option<u32>> {
            self.with_namespace(namespace, false, |nvs| nvs.get_u32(key))
        }

        fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>> {
            self.with_namespace(namespace, false, |nvs| {
                let mut buf = [0u8; MAX_STR_LEN];
                Ok(nvs.get_str(key, &mut buf)?.map(str::to_string))
            })
        }

        fn set_u8(&self, namespace: &str, key: &str, value: u8) -> Result<()> {
            self.with_namespace(namespace, true, |nvs| nvs.set_u8(key, value))
        }

        fn set_u16(&self, namespace: &str, key: &str, value: u16) -> Result<()> {
            self.with_namespace(namespace, true, |nvs| nvs.set_u16(key, value))
        }

        fn set_u32(&self, namespace: &str, key: &str, value: u32) -> Result<()> {
            self.with_namespace(namespace, true, |nvs| nvs.set_u32(key, value))
        }

        fn set_str(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
            self.with_namespace(namespace, true, |nvs| nvs.set_str(key, value))
        }
    }
}
