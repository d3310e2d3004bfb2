//! WiFi module
//!
//! Station mode with the stored credentials, falling back to an access point
//! named after the hostname when the network can't be joined. Bridges only
//! count the link as up while the station is associated and has an address.
//! That check reads event-fed state and never waits on the driver lock, so a
//! scan or reconfiguration in progress doesn't look like a dropped link.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::ipv4::{self, Mask, RouterConfiguration, Subnet};
use esp_idf_svc::netif::{EspNetif, IpEvent, NetifConfiguration, NetifStack};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiDriver,
};
use log::{info, warn};

use crate::config::{WifiSettings, DEFAULT_HOSTNAME};
use crate::error::{Error, Result};
use crate::link::{Connectivity, SharedLink};
use crate::mdns::MdnsResponder;
use crate::registry::WifiConnector;
use crate::storage::{self, KeyValueStore};

/// How long to wait for the station to come up
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const JOIN_POLL: Duration = Duration::from_millis(100);
const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

pub struct WifiLink {
    wifi: Mutex<Box<EspWifi<'static>>>,
    store: Arc<dyn KeyValueStore>,
    /// Station has a DHCP lease
    addressed: SharedLink,
    mdns: Mutex<MdnsResponder>,
    _ip_events: Mutex<EspSubscription<'static, System>>,
}

impl WifiLink {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let addressed = SharedLink::new(false);
        let lease = addressed.clone();
        let ip_events = sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(_) = event {
                lease.set(true);
            }
        })?;

        let driver = WifiDriver::new(modem, sysloop, Some(nvs))?;

        // the fallback AP lives at a fixed address so it's easy to find
        let ap_netif = EspNetif::new_with_conf(&NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Router(RouterConfiguration {
                subnet: Subnet {
                    gateway: AP_ADDRESS,
                    mask: Mask(24),
                },
                dhcp_enabled: true,
                dns: None,
                secondary_dns: None,
            })),
            ..NetifConfiguration::wifi_default_router()
        })?;
        let sta_netif = EspNetif::new(NetifStack::Sta)?;
        let wifi = EspWifi::wrap_all(driver, sta_netif, ap_netif)?;

        let settings = storage::load_wifi_settings(&*store);
        Ok(Self {
            wifi: Mutex::new(Box::new(wifi)),
            store,
            addressed,
            mdns: Mutex::new(
                MdnsResponder::new(&settings.hostname)
                    .or_else(|_| MdnsResponder::new(DEFAULT_HOSTNAME))?,
            ),
            _ip_events: Mutex::new(ip_events),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<EspWifi<'static>>>> {
        self.wifi
            .lock()
            .map_err(|_| Error::Wifi("Failed to lock WiFi driver".to_string()))
    }

    /// Join the stored network, or open the fallback access point
    pub fn bring_up(&self) -> Result<()> {
        let settings = storage::load_wifi_settings(&*self.store);
        let mut wifi = self.lock()?;

        wifi.sta_netif_mut().set_hostname(&settings.hostname)?;

        if !settings.is_unconfigured() && self.join(&mut wifi, &settings)? {
            log_station(&wifi);
            self.announce(&settings);
            return Ok(());
        }

        warn!("WiFi not connected, starting access point {}", settings.hostname);
        self.silence();
        self.addressed.set(false);
        start_access_point(&mut wifi, &settings)
    }

    fn join(&self, wifi: &mut EspWifi<'static>, settings: &WifiSettings) -> Result<bool> {
        // the old lease goes with the old association
        self.addressed.set(false);
        let joined = join(wifi, settings)?;
        if joined {
            self.addressed.set(true);
        }
        Ok(joined)
    }

    fn announce(&self, settings: &WifiSettings) {
        let mut mdns = self.mdns.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = mdns.start(&settings.hostname) {
            warn!("Error setting up mDNS responder: {}", e);
        }
    }

    fn silence(&self) {
        self.mdns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop();
    }

    /// Log the networks in range
    pub fn scan_networks(&self) -> Result<Vec<String>> {
        let mut wifi = self.lock()?;
        let found = wifi.scan()?;

        info!("Scan complete. Found {} networks:", found.len());
        for (i, ap) in found.iter().enumerate() {
            let open = matches!(ap.auth_method, None | Some(AuthMethod::None));
            info!(
                "{:2}: {} (RSSI: {} dBm){}",
                i + 1,
                ap.ssid,
                ap.signal_strength,
                if open { " OPEN" } else { "" }
            );
        }
        Ok(found.into_iter().map(|ap| ap.ssid.to_string()).collect())
    }
}

/// Station mode with `settings`; true once the interface has an address
fn join(wifi: &mut EspWifi<'static>, settings: &WifiSettings) -> Result<bool> {
    if wifi.is_started()? {
        wifi.stop()?;
    }

    let auth_method = if settings.pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: settings.ssid.clone(),
        password: settings.pass.clone(),
        auth_method,
        ..Default::default()
    }))?;
    wifi.start()?;

    info!("Connecting to {}", settings.ssid);
    if let Err(e) = wifi.connect() {
        warn!("WiFi connect to {} failed: {}", settings.ssid, e);
        return Ok(false);
    }

    let deadline = Instant::now() + JOIN_TIMEOUT;
    while Instant::now() < deadline {
        if wifi.is_up()? {
            return Ok(true);
        }
        thread::sleep(JOIN_POLL);
    }
    Ok(false)
}

fn start_access_point(wifi: &mut EspWifi<'static>, settings: &WifiSettings) -> Result<()> {
    if wifi.is_started()? {
        wifi.stop()?;
    }

    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: settings.hostname.clone(),
        auth_method: AuthMethod::None,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;

    info!("Access point {} up at {}", settings.hostname, AP_ADDRESS);
    Ok(())
}

fn log_station(wifi: &EspWifi<'static>) {
    match wifi.sta_netif().get_ip_info() {
        Ok(ip_info) => info!("Wifi connected! IP address: {}", ip_info.ip),
        Err(e) => warn!("Wifi connected, but no IP info: {}", e),
    }
}

/// Asks the WiFi task directly, without going through the driver handle
fn station_associated() -> bool {
    let mut record = esp_idf_sys::wifi_ap_record_t::default();
    // SAFETY: `record` outlives the call and is only written on success
    let rc = unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut record) };
    rc == esp_idf_sys::ESP_OK as esp_idf_sys::esp_err_t
}

impl Connectivity for WifiLink {
    fn is_up(&self) -> bool {
        self.addressed.is_up() && station_associated()
    }
}

impl WifiConnector for WifiLink {
    /// Drop the access point and join the given network
    fn connect(&self, settings: &WifiSettings) -> Result<()> {
        let mut wifi = self.lock()?;
        if self.join(&mut wifi, settings)? {
            log_station(&wifi);
            self.announce(&storage::load_wifi_settings(&*self.store));
            Ok(())
        } else {
            Err(Error::Wifi(format!("Failed to join {}", settings.ssid)))
        }
    }
}
