//! Configuration module
//!
//! Bridge settings that get persisted per bridge code, WiFi credentials, and
//! the task parameters the host picks for every bridge engine.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use heapless::String;

use crate::error::{Error, Result};

/// Transport a bridge pairs its serial endpoint with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeType {
    TcpServer,
    TcpClient,
    Bluetooth,
    Ble,
}

impl BridgeType {
    /// Every variant, in persisted order
    pub const ALL: [BridgeType; 4] = [
        BridgeType::TcpServer,
        BridgeType::TcpClient,
        BridgeType::Bluetooth,
        BridgeType::Ble,
    ];

    /// The types an operator can pick from the settings page
    pub const SELECTABLE: [BridgeType; 3] = [
        BridgeType::TcpServer,
        BridgeType::TcpClient,
        BridgeType::Bluetooth,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            BridgeType::TcpServer => "TCP Server",
            BridgeType::TcpClient => "TCP Client",
            BridgeType::Bluetooth => "Bluetooth",
            BridgeType::Ble => "BLE",
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Out-of-range values fall back to [`BridgeType::TcpServer`].
    pub fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Case-insensitive; anything unrecognised is a TCP server.
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(text))
            .unwrap_or_default()
    }

    /// Whether the bridge needs the WiFi link before it can make progress
    pub const fn needs_network(self) -> bool {
        matches!(self, BridgeType::TcpServer | BridgeType::TcpClient)
    }
}

impl Default for BridgeType {
    fn default() -> Self {
        BridgeType::TcpServer
    }
}

impl fmt::Display for BridgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeType {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_text(s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Serial frame format: data bits x parity x stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerialFormat {
    F5N1, F6N1, F7N1, F8N1,
    F5N2, F6N2, F7N2, F8N2,
    F5E1, F6E1, F7E1, F8E1,
    F5E2, F6E2, F7E2, F8E2,
    F5O1, F6O1, F7O1, F8O1,
    F5O2, F6O2, F7O2, F8O2,
}

const FORMAT_TEXT: [&str; 24] = [
    "5N1", "6N1", "7N1", "8N1",
    "5N2", "6N2", "7N2", "8N2",
    "5E1", "6E1", "7E1", "8E1",
    "5E2", "6E2", "7E2", "8E2",
    "5O1", "6O1", "7O1", "8O1",
    "5O2", "6O2", "7O2", "8O2",
];

impl SerialFormat {
    /// Every variant, in persisted order
    pub const ALL: [SerialFormat; 24] = {
        use SerialFormat::*;
        [
            F5N1, F6N1, F7N1, F8N1,
            F5N2, F6N2, F7N2, F8N2,
            F5E1, F6E1, F7E1, F8E1,
            F5E2, F6E2, F7E2, F8E2,
            F5O1, F6O1, F7O1, F8O1,
            F5O2, F6O2, F7O2, F8O2,
        ]
    };

    pub const fn as_str(self) -> &'static str {
        FORMAT_TEXT[self as usize]
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Out-of-range values fall back to 8N1.
    pub fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Case-insensitive ("8n1" works); anything unrecognised is 8N1.
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        FORMAT_TEXT
            .iter()
            .position(|f| f.eq_ignore_ascii_case(text))
            .map(|i| Self::ALL[i])
            .unwrap_or_default()
    }

    pub const fn data_bits(self) -> u8 {
        (self as u8 % 4) + 5
    }

    pub const fn parity(self) -> Parity {
        match self as u8 / 8 {
            0 => Parity::None,
            1 => Parity::Even,
            _ => Parity::Odd,
        }
    }

    pub const fn stop_bits(self) -> StopBits {
        if (self as u8 / 4) % 2 == 0 {
            StopBits::One
        } else {
            StopBits::Two
        }
    }
}

impl Default for SerialFormat {
    fn default() -> Self {
        SerialFormat::F8N1
    }
}

impl fmt::Display for SerialFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerialFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_text(s))
    }
}

/// Behavioural settings of one bridge, persisted under the bridge code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub bridge_type: BridgeType,
    /// Remote host, only used by TCP clients
    pub host: std::string::String,
    /// Listen port for servers, remote port for clients
    pub port: u16,
    pub baud: u32,
    pub serial_format: SerialFormat,
    /// The attached device echoes what it receives
    pub has_echo: bool,
    /// Peers expect an echo the device doesn't produce
    pub simulate_echo: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_type: BridgeType::TcpServer,
            host: std::string::String::new(),
            port: 3000,
            baud: 9600,
            serial_format: SerialFormat::F8N1,
            has_echo: false,
            simulate_echo: false,
        }
    }
}

/// Hostname for DHCP and mDNS; also the fallback access point name
pub const DEFAULT_HOSTNAME: &str = "SerialServer";

/// WiFi credentials, persisted in the "wifi" namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiSettings {
    pub ssid: String<32>,
    pub pass: String<64>,
    pub hostname: String<32>,
}

impl WifiSettings {
    pub fn new(ssid: &str, pass: &str, hostname: &str) -> Result<Self> {
        Ok(Self {
            ssid: String::try_from(ssid)
                .map_err(|_| Error::Wifi(format!("SSID longer than 32 bytes: {}", ssid)))?,
            pass: String::try_from(pass)
                .map_err(|_| Error::Wifi("password longer than 64 bytes".to_string()))?,
            hostname: String::try_from(hostname)
                .map_err(|_| Error::Wifi(format!("hostname longer than 32 bytes: {}", hostname)))?,
        })
    }

    /// No station credentials stored yet
    pub fn is_unconfigured(&self) -> bool {
        self.ssid.is_empty()
    }
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            pass: String::new(),
            hostname: String::try_from(DEFAULT_HOSTNAME).unwrap_or_default(),
        }
    }
}

/// Task parameters for a bridge engine, picked by whoever wires the bridges up
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the private pump buffer of each bridge task
    pub buffer_size: usize,
    /// Stack size of each bridge thread
    pub stack_size: usize,
    /// Poll interval while waiting for the WiFi link
    pub link_poll: Duration,
    /// Poll interval of a TCP server with no pending connection
    pub accept_poll: Duration,
    /// Sleep when neither side had anything to forward
    pub idle_yield: Duration,
    /// Delay between failed TCP client connect attempts
    pub client_backoff: Duration,
    /// Delay before re-dialing / re-accepting after a session ends
    pub reconnect_delay: Duration,
    /// Upper bound on a single TCP client connect attempt
    pub connect_timeout: Duration,
    /// Upper bound on a socket write that keeps hitting a full send buffer
    pub write_timeout: Duration,
    /// Poll interval while waiting for a BLE peer
    pub ble_poll: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 512,
            stack_size: 8192,
            link_poll: Duration::from_millis(250),
            accept_poll: Duration::from_millis(20),
            idle_yield: Duration::from_millis(2),
            client_backoff: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            ble_poll: Duration::from_millis(500),
        }
    }
}
