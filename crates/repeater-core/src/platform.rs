//! Collaborator capabilities consumed by the engine.
//!
//! Everything the engine needs from the radio driver, the IP stack, GPIO,
//! the telemetry client and the system is reached through [`Platform`].
//! All methods are synchronous and must not block: long operations (scan,
//! ping, telemetry connect) start work and report back later as signals.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::addr::MacAddr;
use crate::config::DhcpLease;
use crate::fixed::FixedStr;
use crate::netif::{NetifHandlers, NetifId};
use crate::portmap::PortmapTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    Station,
    StationAp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WifiInterface {
    Station,
    SoftAp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyMode {
    B,
    G,
    N,
}

impl PhyMode {
    pub fn from_number(n: u16) -> Option<Self> {
        match n {
            1 => Some(PhyMode::B),
            2 => Some(PhyMode::G),
            3 => Some(PhyMode::N),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            PhyMode::B => 'b',
            PhyMode::G => 'g',
            PhyMode::N => 'n',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output,
    InputPullUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    pub ssid: FixedStr<32>,
    pub password: FixedStr<64>,
    /// Only join this access point when set.
    pub bssid: Option<MacAddr>,
    pub hostname: FixedStr<32>,
    pub auto_connect: bool,
    pub peap: Option<PeapCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeapCredentials {
    pub identity: FixedStr<64>,
    pub username: FixedStr<64>,
    pub password: FixedStr<32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftApConfig {
    pub ssid: FixedStr<32>,
    /// `None` for an open network.
    pub password: Option<FixedStr<64>>,
    pub hidden: bool,
    pub max_connections: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpInfo {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gw: Ipv4Addr,
}

/// Addressing pushed to the AP interface and its DHCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftApIpConfig {
    pub ip: IpInfo,
    pub lease_start: Ipv4Addr,
    pub lease_end: Ipv4Addr,
    pub dns: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationInfo {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub id: NetifId,
    /// Two-letter stack name, e.g. `ew`.
    pub name: [u8; 2],
    pub num: u8,
    pub ip: IpInfo,
    pub up: bool,
}

impl InterfaceInfo {
    /// `name` plus number, as typed on the console (`ew0`).
    pub fn label(&self) -> String {
        format!(
            "{}{}{}",
            self.name[0] as char, self.name[1] as char, self.num
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub network: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gw: Ipv4Addr,
}

/// A DHCP server binding with its remaining lease time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpMapping {
    pub lease: DhcpLease,
    pub lease_timer: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetConfig {
    /// `None` requests DHCP.
    pub static_ip: Option<IpInfo>,
    pub mac: Option<MacAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub host: FixedStr<32>,
    pub port: u16,
    pub client_id: FixedStr<32>,
    pub user: FixedStr<32>,
    pub password: FixedStr<32>,
    pub keepalive: Duration,
}

pub trait Platform: NetifHandlers {
    // ========================================================================
    // System
    // ========================================================================

    fn uptime(&self) -> Duration;

    fn free_heap(&self) -> u32;

    /// Instantaneous supply voltage in millivolts.
    fn read_vdd(&mut self) -> u32;

    fn set_cpu_frequency(&mut self, mhz: u16) -> bool;

    /// Route debug output to the serial line (off while it drives an LED).
    fn set_debug_output(&mut self, enabled: bool);

    fn random_bytes(&mut self, buf: &mut [u8]);

    // ========================================================================
    // GPIO
    // ========================================================================

    fn gpio_mode(&mut self, pin: u16, mode: PinMode);

    fn gpio_read(&mut self, pin: u16) -> bool;

    fn gpio_write(&mut self, pin: u16, level: bool);

    /// Enable or disable the edge interrupt of an input pin.
    fn gpio_interrupt(&mut self, pin: u16, enabled: bool);

    // ========================================================================
    // Radio
    // ========================================================================

    fn set_opmode(&mut self, mode: OpMode);

    fn mac_address(&self, iface: WifiInterface) -> MacAddr;

    fn set_mac_address(&mut self, iface: WifiInterface, mac: MacAddr);

    fn set_station_config(&mut self, config: &StationConfig);

    fn set_softap_config(&mut self, config: &SoftApConfig);

    fn phy_mode(&self) -> PhyMode;

    fn set_phy_mode(&mut self, mode: PhyMode) -> bool;

    fn station_connect(&mut self);

    fn station_disconnect(&mut self);

    fn station_rssi(&self) -> i8;

    /// Start an access point scan; results arrive as a signal.
    fn start_scan(&mut self) -> bool;

    fn softap_stations(&self) -> Vec<StationInfo>;

    // ========================================================================
    // IP stack
    // ========================================================================

    fn interfaces(&self) -> Vec<InterfaceInfo>;

    fn set_interface_up(&mut self, netif: NetifId, up: bool);

    fn set_napt(&mut self, netif: NetifId, enabled: bool);

    /// Static station address; disables the DHCP client.
    fn set_station_ip(&mut self, info: &IpInfo);

    fn configure_softap_ip(&mut self, config: &SoftApIpConfig);

    fn dhcp_server_set_dns(&mut self, dns: Ipv4Addr);

    fn dhcp_server_add_mapping(&mut self, lease: &DhcpLease);

    fn dhcp_server_mappings(&self) -> Vec<DhcpMapping>;

    /// DNS server learned from the station's DHCP lease.
    fn dhcp_dns(&self) -> Ipv4Addr;

    fn routes(&self) -> Vec<RouteEntry>;

    fn add_route(&mut self, route: RouteEntry) -> bool;

    fn remove_route(&mut self, network: Ipv4Addr, mask: Ipv4Addr) -> bool;

    fn clear_routes(&mut self);

    fn apply_portmaps(&mut self, table: &PortmapTable);

    /// Start pinging; each reply and the summary arrive as signals.
    fn start_ping(&mut self, target: Ipv4Addr, count: u32) -> bool;

    fn init_ethernet(&mut self, config: &EthernetConfig) -> bool;

    // ========================================================================
    // Telemetry
    // ========================================================================

    fn telemetry_init(&mut self, config: &TelemetryConfig);

    fn telemetry_connect(&mut self);

    fn telemetry_disconnect(&mut self);

    fn telemetry_connected(&self) -> bool;

    fn telemetry_subscribe(&mut self, topic: &str);

    fn telemetry_publish(&mut self, topic: &str, payload: &[u8]);
}
