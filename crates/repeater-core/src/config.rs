//! The configuration record.
//!
//! One [`ConfigRecord`] holds every persisted operational setting. It is
//! created at boot from flash (or the compiled defaults), mutated only by
//! the command interpreter and written back on an explicit `save`.

use std::net::Ipv4Addr;

use serde::Serialize;

use crate::addr::MacAddr;
use crate::fixed::FixedStr;

pub const FW_VERSION: &str = "V1.0";

pub const MAX_CLIENTS: u8 = 8;
pub const MAX_DHCP: usize = 8;

/// GPIO numbers above this disable the pin-based feature.
pub const MAX_GPIO: u16 = 16;

pub const USER_GPIO_IN: u16 = 5;
pub const USER_GPIO_OUT: u16 = 13;

pub const DEFAULT_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

/// Bits of [`ConfigRecord::config_access`].
pub const LOCAL_ACCESS: u8 = 0x01;
pub const REMOTE_ACCESS: u8 = 0x02;

/// Watchdog value meaning "disabled".
pub const WATCHDOG_OFF: i32 = -1;
pub const MIN_WATCHDOG_SECS: i32 = 30;

pub const MQTT_TOPIC_PREFIX: &str = "/esp8266_dtt_va";
pub const MQTT_ID_PREFIX: &str = "dtt_va";

/// A DHCP lease pinned to a station MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DhcpLease {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigRecord {
    // Station
    pub ssid: FixedStr<32>,
    #[serde(skip)]
    pub password: FixedStr<64>,
    pub auto_connect: bool,
    pub bssid: MacAddr,
    pub sta_hostname: FixedStr<32>,

    // Access point
    pub ap_ssid: FixedStr<32>,
    #[serde(skip)]
    pub ap_password: FixedStr<64>,
    pub ap_open: bool,
    pub ap_on: bool,
    pub ssid_hidden: bool,
    pub max_clients: u8,

    // Extended authentication
    pub use_peap: bool,
    pub peap_identity: FixedStr<64>,
    pub peap_username: FixedStr<64>,
    #[serde(skip)]
    pub peap_password: FixedStr<32>,

    // Lock
    #[serde(skip)]
    pub lock_password: FixedStr<64>,
    pub locked: bool,

    pub ap_watchdog: i32,
    pub client_watchdog: i32,

    // Addressing
    pub nat_enable: bool,
    pub network_addr: Ipv4Addr,
    pub dns_addr: Ipv4Addr,
    pub my_addr: Ipv4Addr,
    pub my_netmask: Ipv4Addr,
    pub my_gw: Ipv4Addr,

    // System
    pub phy_mode: u16,
    pub clock_speed: u16,
    pub status_led: u16,
    pub hw_reset: u16,
    pub vmin: i32,
    pub vmin_sleep: i32,
    pub config_port: u16,
    pub web_port: u16,
    pub config_access: u8,
    pub gpio_out_status: u8,

    // Telemetry
    pub mqtt_host: FixedStr<32>,
    pub mqtt_port: u16,
    pub mqtt_user: FixedStr<32>,
    #[serde(skip)]
    pub mqtt_password: FixedStr<32>,
    pub mqtt_id: FixedStr<32>,
    pub mqtt_prefix: FixedStr<64>,
    pub mqtt_pub_topic: FixedStr<64>,
    pub mqtt_sub_topic: FixedStr<64>,

    pub ap_mac: MacAddr,
    pub sta_mac: MacAddr,

    // Wired interface
    pub eth_enable: bool,
    pub eth_addr: Ipv4Addr,
    pub eth_netmask: Ipv4Addr,
    pub eth_gw: Ipv4Addr,
    pub eth_mac: MacAddr,

    pub dhcp_leases: Vec<DhcpLease>,
}

impl ConfigRecord {
    /// The compiled-in defaults. Always yields the same record.
    pub fn defaults() -> Self {
        let prefix = MQTT_TOPIC_PREFIX.as_bytes();
        Self {
            ssid: FixedStr::truncated(b"ssid"),
            password: FixedStr::truncated(b"password"),
            auto_connect: false,
            bssid: MacAddr::ZERO,
            sta_hostname: FixedStr::truncated(b"repeater"),

            ap_ssid: FixedStr::truncated(b"Den Trai Tim"),
            ap_password: FixedStr::truncated(b"12345678"),
            ap_open: true,
            ap_on: true,
            ssid_hidden: false,
            max_clients: MAX_CLIENTS,

            use_peap: false,
            peap_identity: FixedStr::empty(),
            peap_username: FixedStr::empty(),
            peap_password: FixedStr::empty(),

            lock_password: FixedStr::empty(),
            locked: false,

            ap_watchdog: WATCHDOG_OFF,
            client_watchdog: WATCHDOG_OFF,

            nat_enable: true,
            network_addr: Ipv4Addr::new(192, 168, 4, 0),
            dns_addr: Ipv4Addr::UNSPECIFIED,
            my_addr: Ipv4Addr::UNSPECIFIED,
            my_netmask: Ipv4Addr::UNSPECIFIED,
            my_gw: Ipv4Addr::UNSPECIFIED,

            phy_mode: 3,
            clock_speed: 80,
            status_led: 2,
            hw_reset: 4,
            vmin: 0,
            vmin_sleep: 60,
            config_port: 7777,
            web_port: 80,
            config_access: LOCAL_ACCESS | REMOTE_ACCESS,
            gpio_out_status: 0,

            mqtt_host: FixedStr::truncated(b"none"),
            mqtt_port: 1883,
            mqtt_user: FixedStr::truncated(b"none"),
            mqtt_password: FixedStr::truncated(b"none"),
            mqtt_id: FixedStr::truncated(MQTT_ID_PREFIX.as_bytes()),
            mqtt_prefix: FixedStr::truncated(prefix),
            mqtt_pub_topic: FixedStr::truncated(&[prefix, &b"/status"[..]].concat()),
            mqtt_sub_topic: FixedStr::truncated(&[prefix, &b"/command"[..]].concat()),

            ap_mac: MacAddr::ZERO,
            sta_mac: MacAddr::ZERO,

            eth_enable: false,
            eth_addr: Ipv4Addr::UNSPECIFIED,
            eth_netmask: Ipv4Addr::UNSPECIFIED,
            eth_gw: Ipv4Addr::UNSPECIFIED,
            eth_mac: MacAddr::ZERO,

            dhcp_leases: Vec::new(),
        }
    }

    /// Factory defaults, keeping the reset pin so the button still works.
    pub fn factory_reset_keeping_pin(&self) -> Self {
        Self {
            hw_reset: self.hw_reset,
            ..Self::defaults()
        }
    }

    pub fn telemetry_enabled(&self) -> bool {
        !self.mqtt_host.is_empty() && self.mqtt_host != "none"
    }

    pub fn status_led_pin(&self) -> Option<u16> {
        (self.status_led <= MAX_GPIO).then_some(self.status_led)
    }

    pub fn hw_reset_pin(&self) -> Option<u16> {
        (self.hw_reset <= MAX_GPIO).then_some(self.hw_reset)
    }

    /// Address of the AP interface inside the configured /24.
    pub fn ap_address(&self) -> Ipv4Addr {
        crate::addr::ap_address(self.network_addr)
    }
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_deterministic() {
        assert_eq!(ConfigRecord::defaults(), ConfigRecord::defaults());
    }

    #[test]
    fn test_default_topics() {
        let cfg = ConfigRecord::defaults();
        assert_eq!(cfg.mqtt_pub_topic, "/esp8266_dtt_va/status");
        assert_eq!(cfg.mqtt_sub_topic, "/esp8266_dtt_va/command");
        assert!(!cfg.telemetry_enabled());
    }

    #[test]
    fn test_factory_reset_keeps_pin() {
        let mut cfg = ConfigRecord::defaults();
        cfg.hw_reset = 12;
        cfg.ssid = FixedStr::truncated(b"home");
        cfg.locked = true;
        let reset = cfg.factory_reset_keeping_pin();
        assert_eq!(reset.hw_reset, 12);
        assert_eq!(reset.ssid, "ssid");
        assert!(!reset.locked);
    }

    #[test]
    fn test_serialize_omits_secrets() {
        let json = serde_json::to_value(ConfigRecord::defaults()).unwrap();
        assert_eq!(json["ap_ssid"], "Den Trai Tim");
        assert!(json.get("password").is_none());
        assert!(json.get("lock_password").is_none());
        assert!(json.get("mqtt_password").is_none());
    }

    #[test]
    fn test_ap_address() {
        assert_eq!(
            ConfigRecord::defaults().ap_address(),
            Ipv4Addr::new(192, 168, 4, 1)
        );
    }
}
