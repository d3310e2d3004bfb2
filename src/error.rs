use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Error type shared by every bridge component
#[derive(Debug)]
pub enum Error {
    /// I/O errors
    Io(io::Error),
    /// ESP-IDF specific errors
    Esp(String),
    /// WiFi bring-up errors
    Wifi(String),
    /// TCP socket errors
    Tcp(String),
    /// Serial endpoint errors
    Serial(String),
    /// Persisted settings errors
    Storage(String),
    /// BLE radio / GATT errors
    Ble(String),
    /// The bridge type needs hardware this build doesn't have
    Unsupported(String),
    /// General errors
    General(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Esp(msg) => write!(f, "ESP-IDF error: {}", msg),
            Error::Wifi(msg) => write!(f, "WiFi error: {}", msg),
            Error::Tcp(msg) => write!(f, "TCP error: {}", msg),
            Error::Serial(msg) => write!(f, "Serial error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Ble(msg) => write!(f, "BLE error: {}", msg),
            Error::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Error::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::General(err.to_string())
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for Error {
    fn from(err: esp_idf_sys::EspError) -> Self {
        Error::Esp(err.to_string())
    }
}

/// Result type for the bridge
pub type Result<T> = std::result::Result<T, Error>;
