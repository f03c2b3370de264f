//! `show [config|stats|route|dhcp|mqtt]`.
//!
//! Secrets render as `***` while the configuration is locked.

use std::fmt::Display;
use std::net::Ipv4Addr;

use super::{CommandError, CommandResult};
use crate::addr::{format_network, MacAddr};
use crate::config::{FW_VERSION, MAX_CLIENTS};
use crate::engine::Repeater;
use crate::flash::Flash;
use crate::platform::{Platform, WifiInterface};
use crate::response::Response;
use crate::tokenizer::Tokens;

/// Width of the network column in `show route`.
const ROUTE_COLUMN: usize = 21;

const REDACTED: &str = "***";

fn route_line(network: &str, dest: impl Display) -> String {
    format!("{network:<width$}{dest}", width = ROUTE_COLUMN)
}

impl<P: Platform, F: Flash> Repeater<P, F> {
    pub(super) fn cmd_show(&mut self, tokens: &Tokens) -> CommandResult {
        let caps = self.state.capabilities;
        match tokens.str(1) {
            None | Some("config") => Ok(self.show_config()),
            Some("stats") => Ok(self.show_stats()),
            Some("route") => Ok(self.show_route()),
            Some("dhcp") => Ok(self.show_dhcp()),
            Some("mqtt") if caps.telemetry => Ok(self.show_mqtt()),
            _ => Err(CommandError::InvalidArg),
        }
    }

    /// `secret` unless locked.
    fn secret(&self, secret: impl Display) -> String {
        if self.state.config.locked {
            REDACTED.to_string()
        } else {
            secret.to_string()
        }
    }

    /// The configured MAC, or the one in use when the factory address is kept.
    fn effective_mac(&self, iface: WifiInterface, configured: MacAddr) -> MacAddr {
        if configured.is_zero() || configured.is_random() {
            self.platform.mac_address(iface)
        } else {
            configured
        }
    }

    fn show_config(&self) -> Response {
        let caps = self.state.capabilities;
        let cfg = &self.state.config;
        let mut r = Response::new();

        r.push(format!("Version {FW_VERSION}"));
        r.push(format!(
            "STA: SSID:{} PW:{}{}",
            cfg.ssid,
            self.secret(cfg.password),
            if cfg.auto_connect { "" } else { " [AutoConnect:0]" }
        ));
        if !cfg.bssid.is_zero() {
            r.push(format!("BSSID: {}", cfg.bssid));
        }
        if caps.peap && cfg.use_peap {
            r.push(format!(
                "PEAP: Identity:{} Username:{} Password: {}",
                cfg.peap_identity,
                cfg.peap_username,
                self.secret(cfg.peap_password)
            ));
        }
        if !cfg.my_addr.is_unspecified() {
            r.push(format!(
                "STA: IP: {} Netmask: {} Gateway: {}",
                cfg.my_addr, cfg.my_netmask, cfg.my_gw
            ));
        }
        if !cfg.dns_addr.is_unspecified() {
            r.push(format!(" DNS: {}", cfg.dns_addr));
        }
        r.push(format!(
            "AP:  SSID:{} {}PW:{}{}{} IP:{}/24{}",
            cfg.ap_ssid,
            if cfg.ssid_hidden { "[hidden] " } else { "" },
            self.secret(cfg.ap_password),
            if cfg.ap_open { " [open]" } else { "" },
            if cfg.ap_on { "" } else { " [disabled]" },
            cfg.network_addr,
            if cfg.nat_enable { " [NAT]" } else { "" }
        ));
        if caps.ethernet {
            if !cfg.eth_enable {
                r.push("ETH: disabled");
            } else if cfg.eth_addr.is_unspecified() {
                r.push("ETH: DHCP");
            } else {
                r.push(format!(
                    "ETH IP: {} Netmask: {} Gateway: {}",
                    cfg.eth_addr, cfg.eth_netmask, cfg.eth_gw
                ));
            }
        }

        r.push(format!(
            "STA MAC: {}{}",
            self.effective_mac(WifiInterface::Station, cfg.sta_mac),
            if cfg.sta_mac.is_random() { " (random)" } else { "" }
        ));
        r.push(format!(
            "AP MAC:  {}",
            self.effective_mac(WifiInterface::SoftAp, cfg.ap_mac)
        ));
        if caps.ethernet && cfg.eth_enable {
            r.push(format!("ETH MAC: {}", cfg.eth_mac));
        }
        r.push(format!("STA hostname: {}", cfg.sta_hostname));
        if cfg.max_clients != MAX_CLIENTS {
            r.push(format!("Max WiFi clients: {}", cfg.max_clients));
        }
        if caps.remote_console {
            if cfg.config_port == 0 || cfg.config_access == 0 {
                r.push("No network console access");
            } else {
                r.push(format!(
                    "Network console access on port {} (mode {})",
                    cfg.config_port, cfg.config_access
                ));
            }
        }
        r.push(format!("Clock speed: {}", cfg.clock_speed));
        if caps.sleep && cfg.vmin != 0 {
            r.push(format!(
                "Vmin: {} mV Sleep time: {} s",
                cfg.vmin, cfg.vmin_sleep
            ));
        }
        for p in self.state.portmaps.valid_entries() {
            r.push(format!(
                "Portmap: {}: {}:{} -> {}:{}",
                p.protocol, p.maddr, p.mport, p.daddr, p.dport
            ));
        }
        r
    }

    fn show_stats(&self) -> Response {
        let caps = self.state.capabilities;
        let cfg = &self.state.config;
        let mut r = Response::new();

        let secs = self.platform.uptime().as_secs();
        r.push(format!(
            "System uptime: {}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        ));
        let traffic = self.state.traffic.snapshot();
        r.push(format!(
            "{} KiB in ({} packets)",
            traffic.bytes_in / 1024,
            traffic.packets_in
        ));
        r.push(format!(
            "{} KiB out ({} packets)",
            traffic.bytes_out / 1024,
            traffic.packets_out
        ));
        let vdd = self.state.supervisor.vdd;
        r.push(format!("Power supply: {}.{:03} V", vdd / 1000, vdd % 1000));
        if caps.gpio {
            r.push(format!("GPIO output status: {}", cfg.gpio_out_status));
        }
        if caps.phy_mode {
            r.push(format!("Phy mode: {}", self.platform.phy_mode().letter()));
        }
        r.push(format!("Free mem: {}", self.platform.free_heap()));

        match (self.station_cidr(), self.state.station_ip_info()) {
            (Some(cidr), Some(info)) => {
                r.push(format!("STA IP: {cidr} GW: {}", info.gw));
                r.push(format!("STA RSSI: {}", self.platform.station_rssi()));
            }
            _ => {
                r.push("STA not connected");
            }
        }
        if caps.ethernet {
            let eth = self
                .platform
                .interfaces()
                .into_iter()
                .find(|i| &i.name == b"en");
            match eth {
                Some(eth) => r.push(format!(
                    "ETH IP: {} GW: {}",
                    format_network(eth.ip.ip, eth.ip.netmask),
                    eth.ip.gw
                )),
                None => r.push("ETH not initialized"),
            };
        }

        if cfg.ap_on {
            let stations = self.platform.softap_stations();
            r.push(format!(
                "{} Station{} connected to SoftAP",
                stations.len(),
                if stations.len() == 1 { "" } else { "s" }
            ));
            for s in stations {
                r.push(format!("Station: {} - {}", s.mac, s.ip));
            }
        } else {
            r.push("AP disabled");
        }

        if cfg.ap_watchdog >= 0 || cfg.client_watchdog >= 0 {
            r.push(format!(
                "AP watchdog: {} Client watchdog: {}",
                self.state.ap_watchdog.remaining(),
                self.state.client_watchdog.remaining()
            ));
        }
        r
    }

    fn show_route(&self) -> Response {
        let mut r = Response::new();
        r.push("Routing table:");
        r.push(route_line("Network", "Dest"));
        for route in self.platform.routes() {
            r.push(route_line(&format_network(route.network, route.mask), route.gw));
        }

        let interfaces = self.platform.interfaces();
        for iface in interfaces.iter().filter(|i| i.up) {
            let network = Ipv4Addr::from(u32::from(iface.ip.ip) & u32::from(iface.ip.netmask));
            r.push(route_line(
                &format_network(network, iface.ip.netmask),
                iface.label(),
            ));
        }

        // The station interface carries the default route while it is up.
        let uplink = interfaces
            .iter()
            .find(|i| i.up && &i.name == b"ew" && i.num == 0);
        if let Some(iface) = uplink {
            r.push(route_line("default", iface.ip.gw));
        }
        r
    }

    fn show_dhcp(&self) -> Response {
        let mut r = Response::line("DHCP table:");
        for m in self.platform.dhcp_server_mappings() {
            r.push(format!("{} - {} - {}", m.lease.mac, m.lease.ip, m.lease_timer));
        }
        r
    }

    fn show_mqtt(&self) -> Response {
        let cfg = &self.state.config;
        let mut r = Response::new();
        r.push(format!(
            "MQTT client {}",
            if self.platform.telemetry_connected() {
                "connected"
            } else {
                "disconnected"
            }
        ));
        r.push(format!("MQTT host: {}", cfg.mqtt_host));
        r.push(format!("MQTT port: {}", cfg.mqtt_port));
        r.push(format!("MQTT user: {}", cfg.mqtt_user));
        r.push(format!("MQTT password: {}", self.secret(cfg.mqtt_password)));
        r.push(format!("MQTT id: {}", cfg.mqtt_id));
        r.push(format!("MQTT sub topic: {}", cfg.mqtt_sub_topic));
        r.push(format!("MQTT pub topic: {}", cfg.mqtt_pub_topic));
        r
    }
}

#[cfg(test)]
mod tests {
    use crate::capabilities::Capabilities;
    use crate::engine::Repeater;
    use crate::flash::MemoryFlash;
    use crate::platform::{IpInfo, StationInfo};
    use crate::signal::Signal;
    use crate::sim::SimPlatform;
    use crate::state::Origin;
    use crate::store::REQUIRED_SECTORS;
    use crate::MacAddr;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    type TestRepeater = Repeater<SimPlatform, MemoryFlash>;

    fn repeater() -> TestRepeater {
        Repeater::boot(
            SimPlatform::new(),
            MemoryFlash::new(REQUIRED_SECTORS),
            Capabilities::all(),
        )
    }

    fn show(r: &mut TestRepeater, what: &str) -> Vec<String> {
        r.execute(Origin::Serial, format!("show {what}").as_bytes())
            .response
            .lines()
            .to_vec()
    }

    #[test]
    fn test_show_config_defaults() {
        let mut r = repeater();
        let lines = show(&mut r, "config");
        assert_eq!(lines[0], "Version V1.0");
        assert_eq!(lines[1], "STA: SSID:ssid PW:password [AutoConnect:0]");
        assert_eq!(
            lines[2],
            "AP:  SSID:Den Trai Tim PW:12345678 [open] IP:192.168.4.0/24 [NAT]"
        );
        assert_eq!(lines[3], "ETH: disabled");
        assert_eq!(lines[4], "STA MAC: 18:fe:34:00:00:01");
        assert!(lines.contains(&"Network console access on port 7777 (mode 3)".to_string()));
        assert!(lines.contains(&"Clock speed: 80".to_string()));
    }

    #[test]
    fn test_show_redacts_secrets_while_locked() {
        let mut r = repeater();
        r.execute(Origin::Serial, b"set mqtt_password brokerpw");
        r.execute(Origin::Serial, b"lock pw1");
        let text = show(&mut r, "config").join("\n") + &show(&mut r, "mqtt").join("\n");
        assert!(!text.contains("PW:password"));
        assert!(!text.contains("12345678"));
        assert!(!text.contains("brokerpw"));
        assert!(text.contains("PW:***"));
        assert!(text.contains("MQTT password: ***"));
    }

    #[test]
    fn test_show_config_lists_portmaps() {
        let mut r = repeater();
        r.execute(Origin::Serial, b"portmap add UDP 5353 192.168.4.9 53");
        let lines = show(&mut r, "");
        assert_eq!(
            lines.last().unwrap(),
            "Portmap: UDP: 0.0.0.0:5353 -> 192.168.4.9:53"
        );
    }

    #[test]
    fn test_show_stats_when_connected() {
        let mut r = repeater();
        r.platform.stations.push(StationInfo {
            mac: MacAddr([2, 0, 0, 0, 0, 7]),
            ip: Ipv4Addr::new(192, 168, 4, 7),
        });
        let event = r.platform.station_got_ip(IpInfo {
            ip: Ipv4Addr::new(10, 0, 0, 9),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gw: Ipv4Addr::new(10, 0, 0, 1),
        });
        r.dispatch(Signal::Radio(event));

        let lines = show(&mut r, "stats");
        assert!(lines[0].starts_with("System uptime: 0:00:0"));
        assert_eq!(lines[1], "0 KiB in (0 packets)");
        assert_eq!(lines[3], "Power supply: 3.300 V");
        assert!(lines.contains(&"STA IP: 10.0.0.9/24 GW: 10.0.0.1".to_string()));
        assert!(lines.contains(&"STA RSSI: -55".to_string()));
        assert!(lines.contains(&"1 Station connected to SoftAP".to_string()));
        assert!(lines.contains(&"Station: 02:00:00:00:00:07 - 192.168.4.7".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("AP watchdog")));
    }

    #[test]
    fn test_show_route_pads_columns() {
        let mut r = repeater();
        r.apply_softap_ip_config();
        r.execute(Origin::Serial, b"route add 10.8.0.0/16 192.168.4.2");
        let lines = show(&mut r, "route");
        assert_eq!(lines[0], "Routing table:");
        assert_eq!(lines[1], "Network              Dest");
        assert_eq!(lines[2], "10.8.0.0/16          192.168.4.2");
        assert_eq!(lines[3], "192.168.4.0/24       ew1");
        assert_eq!(lines.len(), 4);

        let event = r.platform.station_got_ip(IpInfo {
            ip: Ipv4Addr::new(10, 0, 0, 9),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gw: Ipv4Addr::new(10, 0, 0, 1),
        });
        r.dispatch(Signal::Radio(event));
        let lines = show(&mut r, "route");
        assert!(lines.contains(&"10.0.0.0/24          ew0".to_string()));
        assert_eq!(lines.last().unwrap(), "default              10.0.0.1");
    }

    #[test]
    fn test_show_dhcp() {
        let mut r = repeater();
        r.state.config.dhcp_leases.push(crate::config::DhcpLease {
            mac: MacAddr([2, 0, 0, 0, 0, 3]),
            ip: Ipv4Addr::new(192, 168, 4, 3),
        });
        r.apply_softap_ip_config();
        let lines = show(&mut r, "dhcp");
        assert_eq!(
            lines,
            vec![
                "DHCP table:".to_string(),
                "02:00:00:00:00:03 - 192.168.4.3 - 7200".to_string()
            ]
        );
    }

    #[test]
    fn test_show_unknown_section() {
        let mut r = repeater();
        assert_eq!(show(&mut r, "everything"), vec!["Invalid argument".to_string()]);
    }
}
