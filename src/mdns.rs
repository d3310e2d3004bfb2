//! mDNS responder
//!
//! Answers for `<hostname>.local` while the station is joined to a network.
//! Started after the station gets an address, stopped when the device falls
//! back to its access point. On the host there is no responder and only the
//! bookkeeping runs.

use std::ffi::CString;

use log::info;

use crate::error::{Error, Result};

pub struct MdnsResponder {
    hostname: CString,
    active: bool,
}

impl MdnsResponder {
    pub fn new(hostname: &str) -> Result<Self> {
        Ok(Self {
            hostname: host_label(hostname)?,
            active: false,
        })
    }

    pub fn hostname(&self) -> &str {
        self.hostname.to_str().unwrap_or_default()
    }

    /// Whether the responder is currently answering
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Answer for the hostname; restarts if the name changed
    pub fn start(&mut self, hostname: &str) -> Result<()> {
        let label = host_label(hostname)?;
        if self.active && label == self.hostname {
            return Ok(());
        }
        self.stop();

        platform::start(&label)?;
        self.hostname = label;
        self.active = true;
        info!("mDNS responder up as {}.local", self.hostname());
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        platform::stop();
        self.active = false;
        info!("mDNS responder stopped");
    }
}

impl Drop for MdnsResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hostnames end up in C strings and DNS labels
fn host_label(hostname: &str) -> Result<CString> {
    let hostname = hostname.trim();
    if hostname.is_empty() || hostname.len() > 63 {
        return Err(Error::Wifi(format!("Invalid mDNS hostname '{}'", hostname)));
    }
    CString::new(hostname)
        .map_err(|_| Error::Wifi(format!("Invalid mDNS hostname '{}'", hostname.escape_debug())))
}

#[cfg(feature = "esp32")]
mod platform {
    use std::ffi::CStr;

    use esp_idf_sys::{esp, mdns_free, mdns_hostname_set, mdns_init, mdns_instance_name_set};

    use crate::error::Result;

    pub(super) fn start(hostname: &CStr) -> Result<()> {
        // SAFETY: the strings are NUL terminated and copied by the component
        unsafe {
            esp!(mdns_init())?;
            if let Err(e) = esp!(mdns_hostname_set(hostname.as_ptr()))
                .and_then(|_| esp!(mdns_instance_name_set(hostname.as_ptr())))
            {
                mdns_free();
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub(super) fn stop() {
        // SAFETY: only called after a successful mdns_init
        unsafe { mdns_free() }
    }
}

#[cfg(not(feature = "esp32"))]
mod platform {
    use std::ffi::CStr;

    use crate::error::Result;

    pub(super) fn start(hostname: &CStr) -> Result<()> {
        log::debug!("no mDNS on this target, not announcing {:?}", hostname);
        Ok(())
    }

    pub(super) fn stop() {}
}
