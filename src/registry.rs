//! Bridge registry
//!
//! Keeps track of the bridges the settings UI shows and turns submitted form
//! values into persisted settings. Parsing is as forgiving as the form
//! widgets: unknown choices fall back to defaults and unparsable numbers
//! become 0.

use std::sync::Arc;

use log::{info, warn};

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, BridgeType, SerialFormat, WifiSettings};
use crate::error::{Error, Result};
use crate::storage::{self, KeyValueStore};

/// Something that can (re)join a WiFi network with new credentials
pub trait WifiConnector: Send + Sync {
    fn connect(&self, settings: &WifiSettings) -> Result<()>;
}

/// Raw values of a bridge settings form
#[derive(Debug, Clone, Default)]
pub struct BridgeForm {
    pub bridge_type: String,
    pub host: String,
    pub port: String,
    pub baud: String,
    pub serial_format: String,
    /// Switch value, "0" means off
    pub has_echo: String,
    /// Switch value, "0" means off
    pub simulate_echo: String,
}

impl BridgeForm {
    /// Pre-fill the form from a bridge's current settings
    pub fn from_config(config: &BridgeConfig) -> Self {
        let switch = |on: bool| if on { "1" } else { "0" }.to_string();
        Self {
            bridge_type: config.bridge_type.to_string(),
            host: config.host.clone(),
            port: config.port.to_string(),
            baud: config.baud.to_string(),
            serial_format: config.serial_format.to_string(),
            has_echo: switch(config.has_echo),
            simulate_echo: switch(config.simulate_echo),
        }
    }

    pub fn to_config(&self) -> BridgeConfig {
        BridgeConfig {
            bridge_type: BridgeType::from_text(&self.bridge_type),
            host: self.host.trim().to_string(),
            port: parse_number(&self.port),
            baud: parse_number(&self.baud),
            serial_format: SerialFormat::from_text(&self.serial_format),
            has_echo: self.has_echo.trim() != "0",
            simulate_echo: self.simulate_echo.trim() != "0",
        }
    }
}

/// Leading digits of `text`, 0 when there are none or they overflow
fn parse_number<T: std::str::FromStr + Default>(text: &str) -> T {
    let text = text.trim();
    let digits = text
        .find(|c: char| !c.is_ascii_digit())
        .map_or(text, |end| &text[..end]);
    digits.parse().unwrap_or_default()
}

/// Only TCP clients dial out, so only they need a host
pub fn host_visible(bridge_type: BridgeType) -> bool {
    bridge_type == BridgeType::TcpClient
}

/// Raw values of the WiFi credentials form
#[derive(Debug, Clone, Default)]
pub struct WifiForm {
    pub ssid: String,
    pub pass: String,
}

/// The bridges known to the settings UI, in the order they were added
pub struct BridgeRegistry {
    bridges: Vec<Arc<Bridge>>,
    store: Arc<dyn KeyValueStore>,
    wifi: Option<Arc<dyn WifiConnector>>,
}

impl BridgeRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            bridges: Vec::new(),
            store,
            wifi: None,
        }
    }

    pub fn with_wifi(mut self, wifi: Arc<dyn WifiConnector>) -> Self {
        self.wifi = Some(wifi);
        self
    }

    /// Register a bridge. Bridges without a name or code, and codes that are
    /// already taken, are ignored.
    pub fn add(&mut self, bridge: Arc<Bridge>) -> bool {
        if bridge.name().is_empty() || bridge.code().is_empty() {
            warn!("Ignoring bridge without a name or code");
            return false;
        }
        if self.get(bridge.code()).is_some() {
            warn!("Ignoring duplicate bridge code {}", bridge.code());
            return false;
        }
        self.bridges.push(bridge);
        true
    }

    pub fn get(&self, code: &str) -> Option<&Arc<Bridge>> {
        self.bridges.iter().find(|b| b.code() == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Bridge>> {
        self.bridges.iter()
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    /// Save pressed on a bridge tab
    pub fn submit_bridge(&self, code: &str, form: &BridgeForm) -> Result<BridgeConfig> {
        let bridge = self
            .get(code)
            .ok_or_else(|| Error::General(format!("No bridge with code {}", code)))?;
        let config = form.to_config();
        bridge.set_config(config.clone());
        Ok(config)
    }

    pub fn wifi_settings(&self) -> WifiSettings {
        storage::load_wifi_settings(&*self.store)
    }

    /// Save pressed on the WiFi tab: persist, then try to join
    pub fn submit_wifi(&self, form: &WifiForm) -> Result<()> {
        let current = self.wifi_settings();
        let settings = WifiSettings::new(&form.ssid, &form.pass, &current.hostname)?;
        storage::try_save_wifi_settings(&*self.store, &settings)?;
        info!("Connecting to {}", settings.ssid);

        match &self.wifi {
            Some(wifi) => wifi.connect(&settings),
            None => Ok(()),
        }
    }
}
