//! Network control: radio events, interface patching and the AP subnet.
//!
//! Station and AP sides are tracked independently. Station events move
//! [`StationLink`] through associated and connected; the AP side only
//! patches its interface lazily when the first client joins.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::addr::{format_network, mask_to_prefix, same_slash24, MacAddr};
use crate::config::{USER_GPIO_IN, USER_GPIO_OUT};
use crate::engine::Repeater;
use crate::flash::Flash;
use crate::netif::{Instrumentation, NetifId};
use crate::platform::{IpInfo, Platform, SoftApIpConfig};
use crate::response::Response;
use crate::signal::{BssInfo, RadioEvent, Signal, TelemetryEvent};
use crate::state::{Origin, Reply, StationLink};

/// Last host octet handed out by the AP's DHCP server.
pub const DHCP_LEASE_LAST: u8 = 128;

/// Number of echo requests sent by `ping`.
pub const PING_COUNT: u32 = 4;

impl<P: Platform, F: Flash> Repeater<P, F> {
    /// Interface currently holding `ip`.
    pub fn find_netif(&self, ip: Ipv4Addr) -> Option<NetifId> {
        self.platform
            .interfaces()
            .into_iter()
            .find(|i| i.ip.ip == ip)
            .map(|i| i.id)
    }

    pub(crate) fn on_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StationConnected {
                ssid,
                bssid,
                channel,
            } => {
                info!("Connected to ssid {ssid}, bssid {bssid}, channel {channel}");
                let pinned = self.state.config.bssid;
                self.state.bssid_mismatch = !pinned.is_zero() && pinned != bssid;
                if self.state.bssid_mismatch {
                    warn!("Connected to non configured bssid {bssid} (pinned {pinned})");
                }
                self.state.station = StationLink::Associated { bssid, channel };
                if self.telemetry_active() {
                    self.platform.telemetry_connect();
                }
            }
            RadioEvent::StationGotIp { ip, mask, gw } => self.on_station_got_ip(IpInfo {
                ip,
                netmask: mask,
                gw,
            }),
            RadioEvent::StationDisconnected { ssid, reason } => {
                info!("Disconnected from ssid {ssid}, reason {reason}");
                self.state.station = StationLink::Disconnected;
                self.state.bssid_mismatch = false;
                if self.telemetry_active() {
                    self.platform.telemetry_disconnect();
                }
            }
            RadioEvent::ApStationJoined { mac, aid } => {
                info!("Station {mac} joined, AID = {aid}");
                self.patch_ap_interface();
            }
            RadioEvent::ApStationLeft { mac, aid } => {
                info!("Station {mac} left, AID = {aid}");
            }
        }
    }

    fn on_station_got_ip(&mut self, info: IpInfo) {
        if self.state.config.dns_addr.is_unspecified() {
            let learned = self.platform.dhcp_dns();
            if !learned.is_unspecified() {
                self.state.dns = learned;
            }
        }
        self.platform.dhcp_server_set_dns(self.state.dns);
        info!(
            "ip:{},mask:{},gw:{},dns:{}",
            info.ip, info.netmask, info.gw, self.state.dns
        );

        let (bssid, channel) = match self.state.station {
            StationLink::Associated { bssid, channel }
            | StationLink::Connected { bssid, channel, .. } => (bssid, channel),
            StationLink::Disconnected => (MacAddr::ZERO, 0),
        };
        self.state.station = StationLink::Connected {
            bssid,
            channel,
            ip: info,
        };

        self.patch_station_interface(info.ip);

        self.state.portmaps.rewrite_mapped_address(info.ip);
        self.platform.apply_portmaps(&self.state.portmaps);

        if self.telemetry_active() {
            self.platform.telemetry_connect();
        }
        self.state.post(Signal::NetworkReady);
    }

    /// Station input feeds the AP watchdog; output is passed through untouched.
    fn patch_station_interface(&mut self, ip: Ipv4Addr) {
        let Some(netif) = self.find_netif(ip) else {
            warn!("No interface holds station address {ip}");
            return;
        };
        let input = Instrumentation {
            counters: None,
            feeds: Some(self.state.ap_watchdog.clone()),
        };
        self.state
            .sta_binding
            .patch(&mut self.platform, netif, Some(input), None);
        self.platform.set_napt(netif, false);
    }

    /// AP traffic is counted both ways; input feeds the client watchdog.
    pub(crate) fn patch_ap_interface(&mut self) {
        let Some(netif) = self.find_netif(self.state.config.ap_address()) else {
            debug!("AP interface not configured yet");
            return;
        };
        let input = Instrumentation {
            counters: Some(self.state.traffic.clone()),
            feeds: Some(self.state.client_watchdog.clone()),
        };
        let output = Instrumentation {
            counters: Some(self.state.traffic.clone()),
            feeds: None,
        };
        self.state
            .ap_binding
            .patch(&mut self.platform, netif, Some(input), Some(output));
        self.platform.set_napt(netif, self.state.config.nat_enable);
    }

    /// Push the AP subnet, lease range, DNS and pinned leases to the stack.
    pub fn apply_softap_ip_config(&mut self) {
        let network = self.state.config.network_addr;
        let [a, b, c, _] = network.octets();
        let config = SoftApIpConfig {
            ip: IpInfo {
                ip: Ipv4Addr::new(a, b, c, 1),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gw: Ipv4Addr::new(a, b, c, 1),
            },
            lease_start: Ipv4Addr::new(a, b, c, 2),
            lease_end: Ipv4Addr::new(a, b, c, DHCP_LEASE_LAST),
            dns: self.state.dns,
        };
        self.platform.configure_softap_ip(&config);
        self.platform.dhcp_server_set_dns(self.state.dns);

        let leases: Vec<_> = self
            .state
            .config
            .dhcp_leases
            .iter()
            .filter(|l| same_slash24(l.ip, network))
            .copied()
            .collect();
        for lease in &leases {
            self.platform.dhcp_server_add_mapping(lease);
        }
        info!(
            "AP subnet {} configured, {} static lease(s)",
            format_network(network, Ipv4Addr::new(255, 255, 255, 0)),
            leases.len()
        );
    }

    pub(crate) fn on_scan_done(&mut self, result: Option<Vec<BssInfo>>) -> Reply {
        let to = self.state.scan_target.take().unwrap_or(Origin::Serial);
        let mut response = Response::new();
        match result {
            Some(list) => {
                for bss in list {
                    response.push_fmt(format_args!(
                        "{},\"{}\",{},\"{}\",{}",
                        bss.authmode as u8, bss.ssid, bss.rssi, bss.bssid, bss.channel
                    ));
                }
            }
            None => {
                response.push("scan fail !!!");
            }
        }
        Reply::new(to, response)
    }

    pub(crate) fn on_ping_reply(&mut self, ok: bool, bytes: u32, time: Duration) -> Reply {
        let to = self.state.ping_target.unwrap_or(Origin::Serial);
        let text = if ok {
            format!("ping recv bytes: {bytes} time: {} ms", time.as_millis())
        } else {
            "ping failed".to_string()
        };
        Reply::new(to, Response::raw(text))
    }

    pub(crate) fn on_ping_done(&mut self, received: u32, sent: u32) -> Reply {
        let to = self.state.ping_target.take().unwrap_or(Origin::Serial);
        Reply::new(
            to,
            Response::line(format!("ping finished ({received}/{sent})")),
        )
    }

    pub(crate) fn on_telemetry_event(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Connected => {
                info!("Telemetry connected");
                self.set_gpio_out(1);
                let topic = self.state.config.mqtt_sub_topic.to_string_lossy().into_owned();
                self.platform.telemetry_subscribe(&topic);
            }
            TelemetryEvent::Disconnected => info!("Telemetry disconnected"),
            TelemetryEvent::Message { topic, payload } => {
                let prefix = self.state.config.mqtt_prefix.to_string_lossy();
                if topic.len() <= prefix.len() || !topic.starts_with(prefix.as_ref()) {
                    debug!("Ignoring message on {topic}");
                    return;
                }
                match payload.first() {
                    Some(b'1') => self.set_gpio_out(1),
                    Some(b'0') => self.set_gpio_out(0),
                    _ => debug!("Ignoring payload on {topic}"),
                }
            }
        }
    }

    /// Drop and re-open the telemetry session. False when telemetry is off.
    pub fn reconnect_telemetry(&mut self) -> bool {
        if !self.telemetry_active() {
            return false;
        }
        info!("Reconnecting telemetry");
        self.platform.telemetry_disconnect();
        self.platform.telemetry_connect();
        true
    }

    /// The input pin settled after an edge. A high level toggles the output.
    pub(crate) fn on_gpio_debounced(&mut self, level: bool) {
        if level {
            let status = u8::from(self.state.config.gpio_out_status == 0);
            self.state.config.gpio_out_status = status;
            if self.telemetry_active() && self.platform.telemetry_connected() {
                let topic = self.state.config.mqtt_pub_topic.to_string_lossy().into_owned();
                let payload: &[u8] = if status == 1 { b"1" } else { b"0" };
                self.platform.telemetry_publish(&topic, payload);
            } else {
                self.platform.gpio_write(USER_GPIO_OUT, status != 0);
            }
        }
        self.platform.gpio_interrupt(USER_GPIO_IN, true);
        self.state.gpio_gate.rearm();
    }

    pub(crate) fn set_gpio_out(&mut self, status: u8) {
        self.state.config.gpio_out_status = status;
        if self.state.capabilities.gpio {
            self.platform.gpio_write(USER_GPIO_OUT, status != 0);
        }
    }

    pub(crate) fn telemetry_active(&self) -> bool {
        self.state.capabilities.telemetry && self.state.config.telemetry_enabled()
    }

    /// `a.b.c.d/nn` of the connected station, for status output.
    pub(crate) fn station_cidr(&self) -> Option<String> {
        self.state
            .station_ip_info()
            .map(|i| format!("{}/{}", i.ip, mask_to_prefix(i.netmask)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::config::DhcpLease;
    use crate::fixed::FixedStr;
    use crate::flash::MemoryFlash;
    use crate::netif::Direction;
    use crate::portmap::Protocol;
    use crate::sim::{SimPlatform, AP_NETIF, STA_NETIF};
    use crate::store::REQUIRED_SECTORS;
    use pretty_assertions::assert_eq;

    fn repeater() -> Repeater<SimPlatform, MemoryFlash> {
        Repeater::boot(
            SimPlatform::new(),
            MemoryFlash::new(REQUIRED_SECTORS),
            Capabilities::all(),
        )
    }

    fn connect(r: &mut Repeater<SimPlatform, MemoryFlash>, ip: Ipv4Addr) {
        r.dispatch(Signal::Radio(RadioEvent::StationConnected {
            ssid: FixedStr::truncated(b"uplink"),
            bssid: MacAddr([1, 2, 3, 4, 5, 6]),
            channel: 6,
        }));
        let info = IpInfo {
            ip,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gw: Ipv4Addr::new(10, 0, 0, 1),
        };
        let event = r.platform.station_got_ip(info);
        r.dispatch(Signal::Radio(event));
    }

    #[test]
    fn test_got_ip_rewrites_only_valid_portmaps() {
        let mut r = repeater();
        let old = Ipv4Addr::new(10, 0, 0, 5);
        let new = Ipv4Addr::new(10, 0, 0, 9);
        let daddr = Ipv4Addr::new(192, 168, 4, 2);
        r.state.portmaps.add(Protocol::Tcp, old, 80, daddr, 8080);
        r.state.portmaps.add(Protocol::Udp, old, 53, daddr, 53);
        r.state.portmaps.remove(Protocol::Udp, 53);

        connect(&mut r, new);

        let slots = r.state.portmaps.slots();
        let valid = slots[0].as_ref().unwrap();
        let invalid = slots[1].as_ref().unwrap();
        assert_eq!(valid.maddr, new);
        assert_eq!(invalid.maddr, old);
        assert!(!invalid.valid);
        assert_eq!(r.platform.applied_portmaps.len(), 1);
    }

    #[test]
    fn test_got_ip_marks_connected_and_posts_ready() {
        let mut r = repeater();
        connect(&mut r, Ipv4Addr::new(10, 0, 0, 9));
        assert!(r.state.is_connected());
        assert_eq!(r.state.my_ip(), Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(r.state.drain_outbox(), vec![Signal::NetworkReady]);
    }

    #[test]
    fn test_got_ip_takes_dns_from_dhcp_unless_static() {
        let mut r = repeater();
        r.platform.upstream_dns = Ipv4Addr::new(10, 0, 0, 53);
        connect(&mut r, Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(r.state.dns, Ipv4Addr::new(10, 0, 0, 53));
        assert_eq!(r.platform.dhcp_server_dns, Ipv4Addr::new(10, 0, 0, 53));

        let mut r = repeater();
        r.state.config.dns_addr = Ipv4Addr::new(1, 1, 1, 1);
        r.state.dns = Ipv4Addr::new(1, 1, 1, 1);
        r.platform.upstream_dns = Ipv4Addr::new(10, 0, 0, 53);
        connect(&mut r, Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(r.state.dns, Ipv4Addr::new(1, 1, 1, 1));
    }

    #[test]
    fn test_station_patch_is_idempotent_and_feeds_watchdog() {
        let mut r = repeater();
        r.state.ap_watchdog.configure(30);
        connect(&mut r, Ipv4Addr::new(10, 0, 0, 9));
        let installed = r.platform.handler_ptr(STA_NETIF, Direction::Input);

        // A second address event must not stack another wrapper.
        let event = r.platform.station_got_ip(r.state.station_ip_info().unwrap());
        r.dispatch(Signal::Radio(event));
        assert_eq!(r.platform.handler_ptr(STA_NETIF, Direction::Input), installed);

        for _ in 0..5 {
            r.state.ap_watchdog.tick();
        }
        assert_eq!(r.state.ap_watchdog.remaining(), 25);
        r.platform.deliver(STA_NETIF, Direction::Input, &[0u8; 60]).unwrap();
        assert_eq!(r.state.ap_watchdog.remaining(), 30);
        assert_eq!(r.platform.sink(STA_NETIF, Direction::Input).packets(), 1);
        // Station traffic is not counted.
        assert_eq!(r.state.traffic.snapshot().packets_in, 0);
    }

    #[test]
    fn test_ap_join_patches_ap_interface_with_nat() {
        let mut r = repeater();
        r.apply_softap_ip_config();
        let join = RadioEvent::ApStationJoined {
            mac: MacAddr([2, 0, 0, 0, 0, 1]),
            aid: 1,
        };
        r.dispatch(Signal::Radio(join.clone()));
        r.dispatch(Signal::Radio(join));

        r.platform.deliver(AP_NETIF, Direction::Input, &[0u8; 100]).unwrap();
        r.platform.deliver(AP_NETIF, Direction::Output, &[0u8; 40]).unwrap();
        let snap = r.state.traffic.snapshot();
        assert_eq!(snap.packets_in, 1);
        assert_eq!(snap.bytes_in, 100);
        assert_eq!(snap.packets_out, 1);
        assert_eq!(snap.bytes_out, 40);
        assert_eq!(r.platform.napt.get(&AP_NETIF), Some(&true));
    }

    #[test]
    fn test_disconnect_clears_link() {
        let mut r = repeater();
        connect(&mut r, Ipv4Addr::new(10, 0, 0, 9));
        r.dispatch(Signal::Radio(RadioEvent::StationDisconnected {
            ssid: FixedStr::truncated(b"uplink"),
            reason: 8,
        }));
        assert!(!r.state.is_connected());
        assert_eq!(r.state.uplink_bssid(), None);
    }

    #[test]
    fn test_bssid_mismatch_is_flagged_not_enforced() {
        let mut r = repeater();
        r.state.config.bssid = MacAddr([9, 9, 9, 9, 9, 9]);
        connect(&mut r, Ipv4Addr::new(10, 0, 0, 9));
        assert!(r.state.bssid_mismatch);
        assert_eq!(r.platform.station_disconnects, 0);
        assert!(r.state.is_connected());
    }

    #[test]
    fn test_softap_ip_config_applies_subnet_leases_only() {
        let mut r = repeater();
        r.state.config.dhcp_leases = vec![
            DhcpLease {
                mac: MacAddr([2, 0, 0, 0, 0, 1]),
                ip: Ipv4Addr::new(192, 168, 4, 10),
            },
            DhcpLease {
                mac: MacAddr([2, 0, 0, 0, 0, 2]),
                ip: Ipv4Addr::new(192, 168, 7, 10),
            },
        ];
        r.apply_softap_ip_config();
        let cfg = r.platform.softap_ip.unwrap();
        assert_eq!(cfg.ip.ip, Ipv4Addr::new(192, 168, 4, 1));
        assert_eq!(cfg.lease_start, Ipv4Addr::new(192, 168, 4, 2));
        assert_eq!(cfg.lease_end, Ipv4Addr::new(192, 168, 4, 128));
        assert_eq!(r.platform.dhcp_mappings.len(), 1);
    }

    #[test]
    fn test_scan_result_goes_to_requesting_console() {
        let mut r = repeater();
        r.state.scan_target = Some(Origin::Web);
        let reply = r.on_scan_done(Some(vec![BssInfo {
            authmode: crate::signal::AuthMode::Wpa2Psk,
            ssid: FixedStr::truncated(b"cafe"),
            rssi: -60,
            bssid: MacAddr([0xaa, 0xbb, 0xcc, 0, 1, 2]),
            channel: 11,
        }]));
        assert_eq!(reply.to, Origin::Web);
        assert_eq!(reply.response.lines(), ["3,\"cafe\",-60,\"aa:bb:cc:00:01:02\",11"]);

        let reply = r.on_scan_done(None);
        assert_eq!(reply.to, Origin::Serial);
        assert_eq!(reply.response.text(), "scan fail !!!");
    }

    #[test]
    fn test_ping_replies_are_raw_until_done() {
        let mut r = repeater();
        r.state.ping_target = Some(Origin::Serial);
        let reply = r.on_ping_reply(true, 32, Duration::from_millis(12));
        assert!(!reply.response.has_prompt());
        assert_eq!(reply.response.text(), "ping recv bytes: 32 time: 12 ms");
        let done = r.on_ping_done(3, 4);
        assert!(done.response.has_prompt());
        assert_eq!(done.response.text(), "ping finished (3/4)");
        assert_eq!(r.state.ping_target, None);
    }

    #[test]
    fn test_telemetry_message_drives_gpio_out() {
        let mut r = repeater();
        r.dispatch(Signal::Telemetry(TelemetryEvent::Message {
            topic: "/esp8266_dtt_va/command".into(),
            payload: b"1".to_vec(),
        }));
        assert_eq!(r.state.config.gpio_out_status, 1);
        assert_eq!(r.platform.level(USER_GPIO_OUT), true);

        r.dispatch(Signal::Telemetry(TelemetryEvent::Message {
            topic: "/elsewhere".into(),
            payload: b"0".to_vec(),
        }));
        assert_eq!(r.state.config.gpio_out_status, 1);
    }

    #[test]
    fn test_debounced_edge_toggles_and_rearms() {
        let mut r = repeater();
        assert!(r.state.gpio_gate.fire());
        r.dispatch(Signal::GpioDebounced { level: true });
        assert_eq!(r.state.config.gpio_out_status, 1);
        assert!(r.platform.level(USER_GPIO_OUT));
        assert!(r.state.gpio_gate.is_armed());

        r.dispatch(Signal::GpioDebounced { level: false });
        assert_eq!(r.state.config.gpio_out_status, 1);
    }

    #[test]
    fn test_reconnect_telemetry_only_when_configured() {
        let mut r = repeater();
        assert!(!r.reconnect_telemetry());
        assert_eq!(r.platform.telemetry_connects, 0);

        r.state.config.mqtt_host = FixedStr::truncated(b"broker.lan");
        assert!(r.reconnect_telemetry());
        assert_eq!(r.platform.telemetry_connects, 1);
    }
}
