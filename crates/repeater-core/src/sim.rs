//! In-memory [`Platform`] for tests and the host simulator.
//!
//! Every collaborator call is recorded in public fields so tests can assert
//! on the effects. Two interfaces exist: the station (`ew0`) and the AP
//! (`ew1`), each with a counting sink behind its handler slots.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::addr::MacAddr;
use crate::config::DhcpLease;
use crate::netif::{Direction, HandlerRef, NetifError, NetifHandlers, NetifId, PacketHandler};
use crate::platform::{
    DhcpMapping, EthernetConfig, InterfaceInfo, IpInfo, OpMode, PhyMode, PinMode, Platform,
    RouteEntry, SoftApConfig, SoftApIpConfig, StationConfig, StationInfo, TelemetryConfig,
    WifiInterface,
};
use crate::portmap::{PortmapEntry, PortmapTable};
use crate::signal::RadioEvent;

pub const STA_NETIF: NetifId = NetifId(0);
pub const AP_NETIF: NetifId = NetifId(1);
pub const ETH_NETIF: NetifId = NetifId(2);

/// Lease time reported for every DHCP mapping.
const SIM_LEASE_SECS: u32 = 7200;

/// Terminal handler standing in for the IP stack.
#[derive(Debug, Default)]
pub struct StackSink {
    packets: AtomicU64,
}

impl StackSink {
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

impl PacketHandler for StackSink {
    fn handle(&self, _packet: &[u8]) -> Result<(), NetifError> {
        self.packets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub struct SimInterface {
    pub info: InterfaceInfo,
    input: HandlerRef,
    output: HandlerRef,
    input_sink: Arc<StackSink>,
    output_sink: Arc<StackSink>,
}

impl SimInterface {
    fn new(id: NetifId, name: [u8; 2], num: u8) -> Self {
        let input_sink = Arc::new(StackSink::default());
        let output_sink = Arc::new(StackSink::default());
        Self {
            info: InterfaceInfo {
                id,
                name,
                num,
                ip: IpInfo {
                    ip: Ipv4Addr::UNSPECIFIED,
                    netmask: Ipv4Addr::UNSPECIFIED,
                    gw: Ipv4Addr::UNSPECIFIED,
                },
                up: false,
            },
            input: input_sink.clone(),
            output: output_sink.clone(),
            input_sink,
            output_sink,
        }
    }
}

pub struct SimPlatform {
    pub started: Instant,
    pub free_heap: u32,
    /// Supply voltage returned by [`Platform::read_vdd`], in millivolts.
    pub vdd: u32,
    pub cpu_mhz: u16,
    pub debug_output: bool,
    random_state: u8,

    pub pin_modes: HashMap<u16, PinMode>,
    pub levels: HashMap<u16, bool>,
    pub interrupts: HashMap<u16, bool>,

    pub opmode: Option<OpMode>,
    pub macs: HashMap<WifiInterface, MacAddr>,
    pub station_config: Option<StationConfig>,
    pub softap_config: Option<SoftApConfig>,
    pub phy: PhyMode,
    pub station_connects: u32,
    pub station_disconnects: u32,
    pub rssi: i8,
    pub scan_requests: u32,
    pub scan_available: bool,
    pub stations: Vec<StationInfo>,

    pub interfaces: Vec<SimInterface>,
    pub napt: HashMap<NetifId, bool>,
    pub station_ip: Option<IpInfo>,
    pub softap_ip: Option<SoftApIpConfig>,
    pub softap_ip_applied: u32,
    pub dhcp_server_dns: Ipv4Addr,
    pub dhcp_mappings: Vec<DhcpMapping>,
    /// DNS server handed out by the uplink's DHCP server.
    pub upstream_dns: Ipv4Addr,
    pub routes: Vec<RouteEntry>,
    pub applied_portmaps: Vec<PortmapEntry>,
    pub pings: Vec<(Ipv4Addr, u32)>,
    pub ethernet: Option<EthernetConfig>,

    pub telemetry: Option<TelemetryConfig>,
    pub telemetry_online: bool,
    pub telemetry_connects: u32,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    pub fn new() -> Self {
        let mut macs = HashMap::new();
        macs.insert(WifiInterface::Station, MacAddr([0x18, 0xfe, 0x34, 0, 0, 1]));
        macs.insert(WifiInterface::SoftAp, MacAddr([0x1a, 0xfe, 0x34, 0, 0, 1]));
        Self {
            started: Instant::now(),
            free_heap: 40_000,
            vdd: 3300,
            cpu_mhz: 80,
            debug_output: true,
            random_state: 0x5a,
            pin_modes: HashMap::new(),
            levels: HashMap::new(),
            interrupts: HashMap::new(),
            opmode: None,
            macs,
            station_config: None,
            softap_config: None,
            phy: PhyMode::N,
            station_connects: 0,
            station_disconnects: 0,
            rssi: -55,
            scan_requests: 0,
            scan_available: true,
            stations: Vec::new(),
            interfaces: vec![
                SimInterface::new(STA_NETIF, *b"ew", 0),
                SimInterface::new(AP_NETIF, *b"ew", 1),
            ],
            napt: HashMap::new(),
            station_ip: None,
            softap_ip: None,
            softap_ip_applied: 0,
            dhcp_server_dns: Ipv4Addr::UNSPECIFIED,
            dhcp_mappings: Vec::new(),
            upstream_dns: Ipv4Addr::UNSPECIFIED,
            routes: Vec::new(),
            applied_portmaps: Vec::new(),
            pings: Vec::new(),
            ethernet: None,
            telemetry: None,
            telemetry_online: false,
            telemetry_connects: 0,
            subscriptions: Vec::new(),
            published: Vec::new(),
        }
    }

    /// Level last written to, or forced onto, `pin`. Inputs idle high.
    pub fn level(&self, pin: u16) -> bool {
        self.levels.get(&pin).copied().unwrap_or(true)
    }

    pub fn set_level(&mut self, pin: u16, level: bool) {
        self.levels.insert(pin, level);
    }

    /// Bring the station interface up with `info` and return the matching event.
    pub fn station_got_ip(&mut self, info: IpInfo) -> RadioEvent {
        if let Some(iface) = self.interface_mut(STA_NETIF) {
            iface.info.ip = info;
            iface.info.up = true;
        }
        RadioEvent::StationGotIp {
            ip: info.ip,
            mask: info.netmask,
            gw: info.gw,
        }
    }

    /// Push one packet through the handler currently installed on `netif`.
    pub fn deliver(
        &self,
        netif: NetifId,
        direction: Direction,
        packet: &[u8],
    ) -> Result<(), NetifError> {
        match self.handler(netif, direction) {
            Some(handler) => handler.handle(packet),
            None => Err(NetifError::Down),
        }
    }

    /// The stack end of `netif`, reached after any installed wrappers.
    pub fn sink(&self, netif: NetifId, direction: Direction) -> Arc<StackSink> {
        let iface = self
            .interfaces
            .iter()
            .find(|i| i.info.id == netif)
            .unwrap_or(&self.interfaces[0]);
        match direction {
            Direction::Input => iface.input_sink.clone(),
            Direction::Output => iface.output_sink.clone(),
        }
    }

    /// Address of the handler in a slot, for identity assertions.
    pub fn handler_ptr(&self, netif: NetifId, direction: Direction) -> Option<*const ()> {
        self.handler(netif, direction)
            .map(|h| Arc::as_ptr(&h) as *const ())
    }

    fn interface(&self, netif: NetifId) -> Option<&SimInterface> {
        self.interfaces.iter().find(|i| i.info.id == netif)
    }

    fn interface_mut(&mut self, netif: NetifId) -> Option<&mut SimInterface> {
        self.interfaces.iter_mut().find(|i| i.info.id == netif)
    }
}

impl NetifHandlers for SimPlatform {
    fn handler(&self, netif: NetifId, direction: Direction) -> Option<HandlerRef> {
        self.interface(netif).map(|i| match direction {
            Direction::Input => i.input.clone(),
            Direction::Output => i.output.clone(),
        })
    }

    fn set_handler(&mut self, netif: NetifId, direction: Direction, handler: HandlerRef) {
        if let Some(iface) = self.interface_mut(netif) {
            match direction {
                Direction::Input => iface.input = handler,
                Direction::Output => iface.output = handler,
            }
        }
    }
}

impl Platform for SimPlatform {
    fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    fn free_heap(&self) -> u32 {
        self.free_heap
    }

    fn read_vdd(&mut self) -> u32 {
        self.vdd
    }

    fn set_cpu_frequency(&mut self, mhz: u16) -> bool {
        if matches!(mhz, 80 | 160) {
            self.cpu_mhz = mhz;
            true
        } else {
            false
        }
    }

    fn set_debug_output(&mut self, enabled: bool) {
        self.debug_output = enabled;
    }

    fn random_bytes(&mut self, buf: &mut [u8]) {
        for b in buf {
            self.random_state = self.random_state.wrapping_mul(37).wrapping_add(11);
            *b = self.random_state;
        }
    }

    fn gpio_mode(&mut self, pin: u16, mode: PinMode) {
        self.pin_modes.insert(pin, mode);
    }

    fn gpio_read(&mut self, pin: u16) -> bool {
        self.level(pin)
    }

    fn gpio_write(&mut self, pin: u16, level: bool) {
        self.levels.insert(pin, level);
    }

    fn gpio_interrupt(&mut self, pin: u16, enabled: bool) {
        self.interrupts.insert(pin, enabled);
    }

    fn set_opmode(&mut self, mode: OpMode) {
        self.opmode = Some(mode);
    }

    fn mac_address(&self, iface: WifiInterface) -> MacAddr {
        self.macs.get(&iface).copied().unwrap_or_default()
    }

    fn set_mac_address(&mut self, iface: WifiInterface, mac: MacAddr) {
        self.macs.insert(iface, mac);
    }

    fn set_station_config(&mut self, config: &StationConfig) {
        self.station_config = Some(config.clone());
    }

    fn set_softap_config(&mut self, config: &SoftApConfig) {
        self.softap_config = Some(config.clone());
    }

    fn phy_mode(&self) -> PhyMode {
        self.phy
    }

    fn set_phy_mode(&mut self, mode: PhyMode) -> bool {
        self.phy = mode;
        true
    }

    fn station_connect(&mut self) {
        self.station_connects += 1;
    }

    fn station_disconnect(&mut self) {
        self.station_disconnects += 1;
        if let Some(iface) = self.interface_mut(STA_NETIF) {
            iface.info.up = false;
        }
    }

    fn station_rssi(&self) -> i8 {
        self.rssi
    }

    fn start_scan(&mut self) -> bool {
        self.scan_requests += 1;
        self.scan_available
    }

    fn softap_stations(&self) -> Vec<StationInfo> {
        self.stations.clone()
    }

    fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.interfaces.iter().map(|i| i.info.clone()).collect()
    }

    fn set_interface_up(&mut self, netif: NetifId, up: bool) {
        if let Some(iface) = self.interface_mut(netif) {
            iface.info.up = up;
        }
    }

    fn set_napt(&mut self, netif: NetifId, enabled: bool) {
        self.napt.insert(netif, enabled);
    }

    fn set_station_ip(&mut self, info: &IpInfo) {
        self.station_ip = Some(*info);
    }

    fn configure_softap_ip(&mut self, config: &SoftApIpConfig) {
        self.softap_ip = Some(*config);
        self.softap_ip_applied += 1;
        if let Some(iface) = self.interface_mut(AP_NETIF) {
            iface.info.ip = config.ip;
            iface.info.up = true;
        }
    }

    fn dhcp_server_set_dns(&mut self, dns: Ipv4Addr) {
        self.dhcp_server_dns = dns;
    }

    fn dhcp_server_add_mapping(&mut self, lease: &DhcpLease) {
        self.dhcp_mappings.retain(|m| m.lease.mac != lease.mac);
        self.dhcp_mappings.push(DhcpMapping {
            lease: *lease,
            lease_timer: SIM_LEASE_SECS,
        });
    }

    fn dhcp_server_mappings(&self) -> Vec<DhcpMapping> {
        self.dhcp_mappings.clone()
    }

    fn dhcp_dns(&self) -> Ipv4Addr {
        self.upstream_dns
    }

    fn routes(&self) -> Vec<RouteEntry> {
        self.routes.clone()
    }

    fn add_route(&mut self, route: RouteEntry) -> bool {
        self.routes
            .retain(|r| !(r.network == route.network && r.mask == route.mask));
        self.routes.push(route);
        true
    }

    fn remove_route(&mut self, network: Ipv4Addr, mask: Ipv4Addr) -> bool {
        let before = self.routes.len();
        self.routes
            .retain(|r| !(r.network == network && r.mask == mask));
        self.routes.len() != before
    }

    fn clear_routes(&mut self) {
        self.routes.clear();
    }

    fn apply_portmaps(&mut self, table: &PortmapTable) {
        self.applied_portmaps = table.valid_entries().copied().collect();
    }

    fn start_ping(&mut self, target: Ipv4Addr, count: u32) -> bool {
        self.pings.push((target, count));
        true
    }

    fn init_ethernet(&mut self, config: &EthernetConfig) -> bool {
        self.ethernet = Some(config.clone());
        let mut iface = SimInterface::new(ETH_NETIF, *b"en", 0);
        if let Some(ip) = config.static_ip {
            iface.info.ip = ip;
        }
        iface.info.up = true;
        self.interfaces.retain(|i| i.info.id != ETH_NETIF);
        self.interfaces.push(iface);
        true
    }

    fn telemetry_init(&mut self, config: &TelemetryConfig) {
        self.telemetry = Some(config.clone());
    }

    fn telemetry_connect(&mut self) {
        self.telemetry_connects += 1;
    }

    fn telemetry_disconnect(&mut self) {
        self.telemetry_online = false;
    }

    fn telemetry_connected(&self) -> bool {
        self.telemetry_online
    }

    fn telemetry_subscribe(&mut self, topic: &str) {
        self.subscriptions.push(topic.to_string());
    }

    fn telemetry_publish(&mut self, topic: &str, payload: &[u8]) {
        self.published.push((topic.to_string(), payload.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_reaches_sink() {
        let sim = SimPlatform::new();
        sim.deliver(AP_NETIF, Direction::Output, b"abc").unwrap();
        assert_eq!(sim.sink(AP_NETIF, Direction::Output).packets(), 1);
        assert_eq!(sim.sink(AP_NETIF, Direction::Input).packets(), 0);
    }

    #[test]
    fn test_random_bytes_vary() {
        let mut sim = SimPlatform::new();
        let mut a = [0u8; 6];
        let mut b = [0u8; 6];
        sim.random_bytes(&mut a);
        sim.random_bytes(&mut b);
        assert_ne!(a, b);
    }
}
