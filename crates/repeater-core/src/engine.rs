//! The engine: runtime state, platform and config store under one owner.
//!
//! A [`Repeater`] processes one [`Signal`] at a time. Every mutation of the
//! configuration happens inside [`Repeater::dispatch`] or
//! [`Repeater::tick`], so callers only need to serialize those two.

use tracing::{debug, info, warn};

use crate::capabilities::Capabilities;
use crate::config::{ConfigRecord, USER_GPIO_IN, USER_GPIO_OUT};
use crate::flash::Flash;
use crate::platform::{
    EthernetConfig, IpInfo, OpMode, PeapCredentials, PhyMode, PinMode, Platform, SoftApConfig,
    StationConfig, TelemetryConfig, WifiInterface,
};
use crate::addr::MacAddr;
use crate::portmap::{PortmapTable, PORTMAP_BLOB_LEN};
use crate::signal::Signal;
use crate::state::{Origin, Reply, State};
use crate::store::{ConfigStore, StoreError, PORTMAP_BLOB};

/// Keepalive handed to the telemetry client.
const TELEMETRY_KEEPALIVE_SECS: u64 = 120;

pub struct Repeater<P, F> {
    pub state: State,
    pub platform: P,
    pub store: ConfigStore<F>,
}

impl<P: Platform, F: Flash> Repeater<P, F> {
    /// Load the configuration and bring the platform up from it.
    pub fn boot(platform: P, flash: F, capabilities: Capabilities) -> Self {
        let mut store = ConfigStore::new(flash);
        let (config, valid) = store.load();
        let portmaps = if valid {
            info!("Config loaded from flash");
            match store.blob_load(PORTMAP_BLOB, PORTMAP_BLOB_LEN) {
                Ok(data) => PortmapTable::from_blob(&data),
                Err(e) => {
                    warn!("Port map table unreadable: {e}");
                    PortmapTable::new()
                }
            }
        } else {
            info!("No valid config in flash, using defaults");
            if let Err(e) = store.blob_zero(PORTMAP_BLOB, PORTMAP_BLOB_LEN) {
                warn!("Failed to clear port map table: {e}");
            }
            PortmapTable::new()
        };

        let mut repeater = Self {
            state: State::new(config, portmaps, capabilities),
            platform,
            store,
        };
        repeater.start();
        repeater
    }

    fn start(&mut self) {
        let caps = self.state.capabilities;

        if let Some(pin) = self.state.config.status_led_pin() {
            if pin == 1 {
                self.platform.set_debug_output(false);
            }
            self.platform.gpio_mode(pin, PinMode::Output);
            self.platform.gpio_write(pin, false);
        }
        if let Some(pin) = self.state.config.hw_reset_pin() {
            self.platform.gpio_mode(pin, PinMode::InputPullUp);
        }
        if caps.gpio {
            self.platform.gpio_mode(USER_GPIO_IN, PinMode::InputPullUp);
            self.platform.gpio_mode(USER_GPIO_OUT, PinMode::Output);
            self.state.config.gpio_out_status = 0;
            self.platform.gpio_write(USER_GPIO_OUT, false);
        }

        self.platform.dhcp_server_set_dns(self.state.dns);

        if self.state.config.ap_on {
            self.platform.set_opmode(OpMode::StationAp);
            self.apply_softap_config();
            self.state.ap_active = true;
            self.state.supervisor.ip_config_pending = true;
        } else {
            self.platform.set_opmode(OpMode::Station);
        }

        self.apply_mac(WifiInterface::Station, self.state.config.sta_mac);
        self.apply_mac(WifiInterface::SoftAp, self.state.config.ap_mac);

        if caps.phy_mode {
            match PhyMode::from_number(self.state.config.phy_mode) {
                Some(mode) => {
                    self.platform.set_phy_mode(mode);
                }
                None => warn!("Ignoring phy mode {}", self.state.config.phy_mode),
            }
        }
        if !self.platform.set_cpu_frequency(self.state.config.clock_speed) {
            warn!("Clock speed {} rejected", self.state.config.clock_speed);
        }

        let cfg = &self.state.config;
        if !cfg.my_addr.is_unspecified() {
            let info = IpInfo {
                ip: cfg.my_addr,
                netmask: cfg.my_netmask,
                gw: cfg.my_gw,
            };
            self.platform.set_station_ip(&info);
        }

        if caps.ethernet && cfg.eth_enable {
            let eth = EthernetConfig {
                static_ip: (!cfg.eth_addr.is_unspecified()).then_some(IpInfo {
                    ip: cfg.eth_addr,
                    netmask: cfg.eth_netmask,
                    gw: cfg.eth_gw,
                }),
                mac: (!cfg.eth_mac.is_zero()).then_some(cfg.eth_mac),
            };
            if !self.platform.init_ethernet(&eth) {
                warn!("Ethernet initialization failed");
            }
        }

        if self.telemetry_active() {
            let cfg = &self.state.config;
            let telemetry = TelemetryConfig {
                host: cfg.mqtt_host,
                port: cfg.mqtt_port,
                client_id: cfg.mqtt_id,
                user: cfg.mqtt_user,
                password: cfg.mqtt_password,
                keepalive: std::time::Duration::from_secs(TELEMETRY_KEEPALIVE_SECS),
            };
            self.platform.telemetry_init(&telemetry);
        }

        self.apply_station_config();
        if self.state.config.auto_connect {
            self.platform.station_connect();
        }

        if caps.gpio {
            self.platform.gpio_interrupt(USER_GPIO_IN, true);
            self.state.gpio_gate.rearm();
        }

        if caps.scanning {
            self.state.scan_target = Some(Origin::Serial);
            if !self.platform.start_scan() {
                self.state.scan_target = None;
            }
        }
        info!(
            "Repeater started, AP {}",
            if self.state.ap_active { "on" } else { "off" }
        );
    }

    /// Process one unit of work and return the console output it produced.
    pub fn dispatch(&mut self, signal: Signal) -> Vec<Reply> {
        match signal {
            Signal::Console { origin, line } => vec![self.execute(origin, &line)],
            Signal::Radio(event) => {
                self.on_radio_event(event);
                Vec::new()
            }
            Signal::ScanDone(result) => vec![self.on_scan_done(result)],
            Signal::PingReply { ok, bytes, time } => vec![self.on_ping_reply(ok, bytes, time)],
            Signal::PingDone { received, sent } => vec![self.on_ping_done(received, sent)],
            Signal::Telemetry(event) => {
                self.on_telemetry_event(event);
                Vec::new()
            }
            Signal::GpioDebounced { level } => {
                self.on_gpio_debounced(level);
                Vec::new()
            }
            Signal::NetworkReady => {
                debug!("Network ready");
                Vec::new()
            }
        }
    }

    pub fn config(&self) -> &ConfigRecord {
        &self.state.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.state.capabilities
    }

    pub fn is_locked(&self) -> bool {
        self.state.config.locked
    }

    /// Write the record, then the port map table. No retry on failure.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        self.store.save(&self.state.config)?;
        self.store
            .blob_save(PORTMAP_BLOB, &self.state.portmaps.to_blob())?;
        info!("Config saved");
        Ok(())
    }

    pub(crate) fn apply_station_config(&mut self) {
        let cfg = &self.state.config;
        let peap = (self.state.capabilities.peap && cfg.use_peap).then(|| PeapCredentials {
            identity: cfg.peap_identity,
            username: cfg.peap_username,
            password: cfg.peap_password,
        });
        let station = StationConfig {
            ssid: cfg.ssid,
            password: cfg.password,
            bssid: (!cfg.bssid.is_zero()).then_some(cfg.bssid),
            hostname: cfg.sta_hostname,
            auto_connect: cfg.auto_connect,
            peap,
        };
        self.platform.set_station_config(&station);
    }

    pub(crate) fn apply_softap_config(&mut self) {
        let cfg = &self.state.config;
        let ap = SoftApConfig {
            ssid: cfg.ap_ssid,
            password: (!cfg.ap_open).then_some(cfg.ap_password),
            hidden: cfg.ssid_hidden,
            max_connections: cfg.max_clients,
        };
        self.platform.set_softap_config(&ap);
    }

    /// Zero keeps the factory address; the `random` marker draws a fresh one.
    fn apply_mac(&mut self, iface: WifiInterface, mac: MacAddr) {
        if mac.is_random() {
            let mut bytes = [0u8; 6];
            self.platform.random_bytes(&mut bytes);
            let mac = MacAddr::locally_administered(bytes);
            debug!("Random {iface:?} MAC {mac}");
            self.platform.set_mac_address(iface, mac);
        } else if !mac.is_zero() {
            self.platform.set_mac_address(iface, mac);
        }
    }
}
