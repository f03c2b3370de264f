//! `set <key> <value>`.

use std::net::Ipv4Addr;

use tracing::info;

use super::{arg_fixed, arg_ip, arg_num, CommandError, CommandResult};
use crate::addr::MacAddr;
use crate::capabilities::Feature;
use crate::config::{MAX_CLIENTS, MAX_GPIO, MIN_WATCHDOG_SECS, USER_GPIO_OUT, WATCHDOG_OFF};
use crate::engine::Repeater;
use crate::fixed::FixedStr;
use crate::flash::Flash;
use crate::platform::{OpMode, PhyMode, PinMode, Platform};
use crate::response::Response;
use crate::tokenizer::Tokens;

/// Minimum WPA2 passphrase length.
const MIN_AP_PASSWORD: usize = 8;

/// Feature a key depends on, if any.
fn key_feature(key: &str) -> Option<Feature> {
    match key {
        "use_peap" | "peap_identity" | "peap_username" | "peap_password" => Some(Feature::Peap),
        "config_port" | "config_access" => Some(Feature::RemoteConsole),
        "web_port" => Some(Feature::Web),
        "vmin" | "vmin_sleep" => Some(Feature::Sleep),
        "phy_mode" => Some(Feature::PhyMode),
        "eth_enable" | "eth_ip" | "eth_netmask" | "eth_gw" | "eth_mac" => Some(Feature::Ethernet),
        "mqtt_host" | "mqtt_port" | "mqtt_user" | "mqtt_password" | "mqtt_id"
        | "mqtt_pub_topic" | "mqtt_sub_topic" => Some(Feature::Telemetry),
        "gpio_out" => Some(Feature::Gpio),
        _ => None,
    }
}

/// `0`/`1` style switch; any non-zero number is on.
fn arg_flag(tokens: &Tokens, i: usize) -> Result<bool, CommandError> {
    arg_num::<i32>(tokens, i).map(|v| v != 0)
}

fn arg_mac(tokens: &Tokens, i: usize) -> Result<MacAddr, CommandError> {
    arg_num(tokens, i)
}

/// An address, or `dhcp` for "learn it dynamically" (stored as zero).
fn arg_ip_or_dhcp(tokens: &Tokens, i: usize) -> Result<Option<Ipv4Addr>, CommandError> {
    if tokens.is(i, "dhcp") {
        Ok(None)
    } else {
        arg_ip(tokens, i).map(Some)
    }
}

/// `none` disables; anything below the minimum is refused.
fn arg_watchdog(tokens: &Tokens, label: &str) -> Result<i32, CommandError> {
    if tokens.is(2, "none") {
        return Ok(WATCHDOG_OFF);
    }
    match arg_num::<i32>(tokens, 2) {
        Ok(v) if v >= MIN_WATCHDOG_SECS => Ok(v),
        _ => Err(CommandError::rejected(format!("{label} watchdog value invalid"))),
    }
}

fn ok(text: impl Into<String>) -> CommandResult {
    Ok(Response::line(text))
}

impl<P: Platform, F: Flash> Repeater<P, F> {
    pub(super) fn cmd_set(&mut self, tokens: &Tokens) -> CommandResult {
        let key = tokens.str(1).ok_or(CommandError::Unknown)?;
        if let Some(feature) = key_feature(key) {
            if !self.state.capabilities.has(feature) {
                return Err(CommandError::Unknown);
            }
        }

        let cfg = &mut self.state.config;
        match key {
            // Station
            "ssid" => {
                cfg.ssid = arg_fixed(tokens, 2)?;
                cfg.auto_connect = true;
                ok("SSID set (auto_connect = 1)")
            }
            "password" => {
                cfg.password = arg_fixed(tokens, 2)?;
                // The uplink password doubles as the default lock password.
                cfg.lock_password = cfg.password;
                ok("Password set")
            }
            "auto_connect" => {
                cfg.auto_connect = arg_flag(tokens, 2)?;
                ok("Auto Connect set")
            }
            "sta_hostname" => {
                cfg.sta_hostname = arg_fixed(tokens, 2)?;
                ok("STA hostname set")
            }
            "bssid" => {
                cfg.bssid = arg_mac(tokens, 2)?;
                ok("bssid set")
            }

            // Access point
            "ap_ssid" => {
                cfg.ap_ssid = arg_fixed(tokens, 2)?;
                ok("AP SSID set")
            }
            "ap_password" => {
                let raw = tokens.get(2).ok_or(CommandError::InvalidArg)?;
                if raw.len() < MIN_AP_PASSWORD {
                    return Err(CommandError::rejected("Password too short (min. 8)"));
                }
                cfg.ap_password = arg_fixed(tokens, 2)?;
                cfg.ap_open = false;
                ok("AP Password set")
            }
            "ap_open" => {
                cfg.ap_open = arg_flag(tokens, 2)?;
                ok("Open Auth set")
            }
            "ssid_hidden" => {
                cfg.ssid_hidden = arg_flag(tokens, 2)?;
                ok("Hidden SSID set")
            }
            "max_clients" => {
                let n: u8 = arg_num(tokens, 2)?;
                if n > MAX_CLIENTS {
                    return Err(CommandError::InvalidArg);
                }
                cfg.max_clients = n;
                ok("Max clients set")
            }
            "nat" => {
                let enabled = arg_flag(tokens, 2)?;
                cfg.nat_enable = enabled;
                let ap = cfg.ap_address();
                if let Some(netif) = self.find_netif(ap) {
                    self.platform.set_napt(netif, enabled);
                }
                ok(if enabled { "NAT enabled" } else { "NAT disabled" })
            }
            "ap_on" => self.set_ap_on(arg_flag(tokens, 2)?),
            "ap_watchdog" => {
                let v = arg_watchdog(tokens, "AP")?;
                cfg.ap_watchdog = v;
                self.state.ap_watchdog.configure(v);
                ok(watchdog_message("AP", v))
            }
            "client_watchdog" => {
                let v = arg_watchdog(tokens, "Client")?;
                cfg.client_watchdog = v;
                self.state.client_watchdog.configure(v);
                ok(watchdog_message("Client", v))
            }

            // Extended authentication
            "use_peap" => {
                cfg.use_peap = arg_flag(tokens, 2)?;
                ok("PEAP authentication set")
            }
            "peap_identity" => {
                cfg.peap_identity = arg_fixed(tokens, 2)?;
                ok("PEAP identity set")
            }
            "peap_username" => {
                cfg.peap_username = arg_fixed(tokens, 2)?;
                ok("PEAP username set")
            }
            "peap_password" => {
                cfg.peap_password = arg_fixed(tokens, 2)?;
                ok("PEAP password set")
            }

            // Access to the device
            "config_port" => {
                cfg.config_port = arg_num(tokens, 2)?;
                if cfg.config_port == 0 {
                    ok("WARNING: if you save this, remote console access will be disabled!")
                } else {
                    ok(format!("Config port set to {}", cfg.config_port))
                }
            }
            "config_access" => {
                cfg.config_access = arg_num::<u8>(tokens, 2)? & 0x03;
                if cfg.config_access == 0 {
                    ok("WARNING: if you save this, remote console and web access will be disabled!")
                } else {
                    ok("Config access set")
                }
            }
            "web_port" => {
                cfg.web_port = arg_num(tokens, 2)?;
                if cfg.web_port == 0 {
                    ok("WARNING: if you save this, web config will be disabled!")
                } else {
                    ok(format!("Web port set to {}", cfg.web_port))
                }
            }

            // Power
            "vmin" => {
                cfg.vmin = arg_num(tokens, 2)?;
                ok("Vmin set")
            }
            "vmin_sleep" => {
                cfg.vmin_sleep = arg_num(tokens, 2)?;
                ok("Vmin sleep time set")
            }
            "speed" => {
                let mhz: u16 = arg_num(tokens, 2)?;
                let applied = self.platform.set_cpu_frequency(mhz);
                if applied {
                    self.state.config.clock_speed = mhz;
                }
                ok(format!(
                    "Clock speed update {}",
                    if applied { "successful" } else { "failed" }
                ))
            }

            // Pins
            "status_led" => {
                let pin: u16 = arg_num(tokens, 2)?;
                self.set_status_led(pin)
            }
            "hw_reset" => {
                let pin: u16 = arg_num(tokens, 2)?;
                cfg.hw_reset = pin;
                if pin > MAX_GPIO {
                    return ok("HW factory reset disabled");
                }
                self.platform.gpio_mode(pin, PinMode::InputPullUp);
                ok(format!("HW factory reset set to GPIO {pin}"))
            }
            "gpio_out" => {
                let status: u8 = arg_num(tokens, 2)?;
                cfg.gpio_out_status = status;
                self.platform.gpio_write(USER_GPIO_OUT, status != 0);
                ok(format!("GPIO out set to {status}"))
            }
            "phy_mode" => {
                let n: u16 = arg_num(tokens, 2)?;
                let applied = match PhyMode::from_number(n) {
                    Some(mode) => self.platform.set_phy_mode(mode),
                    None => false,
                };
                if applied {
                    self.state.config.phy_mode = n;
                }
                ok(format!(
                    "Phy mode setting {}",
                    if applied { "successful" } else { "failed" }
                ))
            }

            // Addressing
            "network" => {
                let [a, b, c, _] = arg_ip(tokens, 2)?.octets();
                cfg.network_addr = Ipv4Addr::new(a, b, c, 0);
                ok(format!("Network set to {}/24", cfg.network_addr))
            }
            "dns" => match arg_ip_or_dhcp(tokens, 2)? {
                None => {
                    cfg.dns_addr = Ipv4Addr::UNSPECIFIED;
                    ok("DNS from DHCP")
                }
                Some(dns) => {
                    cfg.dns_addr = dns;
                    if !dns.is_unspecified() {
                        self.state.dns = dns;
                        self.platform.dhcp_server_set_dns(dns);
                    }
                    ok(format!("DNS set to {dns}"))
                }
            },
            "ip" => match arg_ip_or_dhcp(tokens, 2)? {
                None => {
                    cfg.my_addr = Ipv4Addr::UNSPECIFIED;
                    ok("IP from DHCP")
                }
                Some(ip) => {
                    cfg.my_addr = ip;
                    ok(format!("IP address set to {ip}"))
                }
            },
            "netmask" => {
                cfg.my_netmask = arg_ip(tokens, 2)?;
                ok(format!("IP netmask set to {}", cfg.my_netmask))
            }
            "gw" => {
                cfg.my_gw = arg_ip(tokens, 2)?;
                ok(format!("Gateway set to {}", cfg.my_gw))
            }
            "ap_mac" => {
                cfg.ap_mac = arg_mac(tokens, 2)?;
                ok("AP MAC set")
            }
            "sta_mac" => {
                if tokens.is(2, "random") {
                    cfg.sta_mac = MacAddr::RANDOM;
                    return ok("STA MAC randomized");
                }
                cfg.sta_mac = arg_mac(tokens, 2)?;
                ok("STA MAC set")
            }

            // Wired interface
            "eth_enable" => {
                cfg.eth_enable = arg_flag(tokens, 2)?;
                ok(if cfg.eth_enable {
                    "eth enabled"
                } else {
                    "eth disabled"
                })
            }
            "eth_ip" => match arg_ip_or_dhcp(tokens, 2)? {
                None => {
                    cfg.eth_addr = Ipv4Addr::UNSPECIFIED;
                    ok("ETH IP from DHCP")
                }
                Some(ip) => {
                    cfg.eth_addr = ip;
                    ok(format!("ETH IP address set to {ip}"))
                }
            },
            "eth_netmask" => {
                cfg.eth_netmask = arg_ip(tokens, 2)?;
                ok(format!("ETH IP netmask set to {}", cfg.eth_netmask))
            }
            "eth_gw" => {
                cfg.eth_gw = arg_ip(tokens, 2)?;
                ok(format!("ETH Gateway set to {}", cfg.eth_gw))
            }
            "eth_mac" => {
                cfg.eth_mac = arg_mac(tokens, 2)?;
                ok("ETH MAC set")
            }

            // Telemetry: long values are cut to fit.
            "mqtt_host" => {
                cfg.mqtt_host = truncated(tokens)?;
                ok("MQTT host set")
            }
            "mqtt_port" => {
                cfg.mqtt_port = arg_num(tokens, 2)?;
                ok("MQTT port set")
            }
            "mqtt_user" => {
                cfg.mqtt_user = truncated(tokens)?;
                ok("MQTT user set")
            }
            "mqtt_password" => {
                cfg.mqtt_password = truncated(tokens)?;
                ok("MQTT password set")
            }
            "mqtt_id" => {
                cfg.mqtt_id = truncated(tokens)?;
                ok("MQTT id set")
            }
            "mqtt_pub_topic" => {
                cfg.mqtt_pub_topic = truncated(tokens)?;
                ok("MQTT pub topic set")
            }
            "mqtt_sub_topic" => {
                cfg.mqtt_sub_topic = truncated(tokens)?;
                ok("MQTT sub topic set")
            }

            _ => Err(CommandError::Unknown),
        }
    }

    fn set_ap_on(&mut self, on: bool) -> CommandResult {
        if on == self.state.config.ap_on {
            return ok(if on { "AP already on" } else { "AP already off" });
        }
        self.state.config.ap_on = on;
        self.state.ap_active = on;
        if on {
            self.platform.set_opmode(OpMode::StationAp);
            self.apply_softap_config();
            self.state.supervisor.ip_config_pending = true;
            info!("AP enabled");
            ok("AP on")
        } else {
            self.platform.set_opmode(OpMode::Station);
            info!("AP disabled");
            ok("AP off")
        }
    }

    /// Move the status LED, handing the serial pin back to debug output.
    fn set_status_led(&mut self, pin: u16) -> CommandResult {
        if let Some(old) = self.state.config.status_led_pin() {
            self.platform.gpio_write(old, true);
            if old == 1 {
                self.platform.set_debug_output(true);
            }
        }
        self.state.config.status_led = pin;
        if pin > MAX_GPIO {
            return ok("Status led disabled");
        }
        if pin == 1 {
            self.platform.set_debug_output(false);
        }
        self.platform.gpio_mode(pin, PinMode::Output);
        self.platform.gpio_write(pin, false);
        ok(format!("Status led set to GPIO {pin}"))
    }
}

fn truncated<const N: usize>(tokens: &Tokens) -> Result<FixedStr<N>, CommandError> {
    let raw = tokens.get(2).ok_or(CommandError::InvalidArg)?;
    Ok(FixedStr::truncated(raw))
}

fn watchdog_message(label: &str, value: i32) -> String {
    if value == WATCHDOG_OFF {
        format!("{label} watchdog off")
    } else {
        format!("{label} watchdog set to {value}")
    }
}

#[cfg(test)]
mod tests {
    use crate::capabilities::Capabilities;
    use crate::engine::Repeater;
    use crate::flash::MemoryFlash;
    use crate::platform::OpMode;
    use crate::sim::{SimPlatform, AP_NETIF};
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

    fn run(r: &mut TestRepeater, line: &str) -> String {
        r.execute(Origin::Serial, line.as_bytes()).response.text()
    }

    #[test]
    fn test_set_station_credentials() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set ssid My%20Home"), "SSID set (auto_connect = 1)");
        assert_eq!(r.config().ssid, "My Home");
        assert!(r.config().auto_connect);
        assert_eq!(run(&mut r, "set password hunter22"), "Password set");
        assert_eq!(r.config().lock_password, "hunter22");
    }

    #[test]
    fn test_value_too_long_is_refused() {
        let mut r = repeater();
        let long = "x".repeat(40);
        assert_eq!(
            run(&mut r, &format!("set ssid {long}")),
            "Value too long (max. 31)"
        );
        assert_eq!(r.config().ssid, "ssid");
    }

    #[test]
    fn test_mqtt_values_are_truncated() {
        let mut r = repeater();
        let long = "h".repeat(40);
        assert_eq!(run(&mut r, &format!("set mqtt_host {long}")), "MQTT host set");
        assert_eq!(r.config().mqtt_host.len(), 31);
    }

    #[test]
    fn test_ap_password_rules() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set ap_password short"), "Password too short (min. 8)");
        assert!(r.config().ap_open);
        assert_eq!(run(&mut r, "set ap_password longenough"), "AP Password set");
        assert!(!r.config().ap_open);
    }

    #[test]
    fn test_watchdog_values() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set ap_watchdog 10"), "AP watchdog value invalid");
        assert_eq!(r.config().ap_watchdog, -1);
        assert_eq!(run(&mut r, "set ap_watchdog 60"), "AP watchdog set to 60");
        assert_eq!(r.state.ap_watchdog.remaining(), 60);
        assert_eq!(run(&mut r, "set ap_watchdog none"), "AP watchdog off");
        assert_eq!(run(&mut r, "set client_watchdog abc"), "Client watchdog value invalid");
        assert_eq!(run(&mut r, "set client_watchdog 30"), "Client watchdog set to 30");
    }

    #[test]
    fn test_numeric_and_address_validation() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set max_clients 9"), "Invalid argument");
        assert_eq!(run(&mut r, "set max_clients lots"), "Invalid argument");
        assert_eq!(run(&mut r, "set max_clients 4"), "Max clients set");
        assert_eq!(run(&mut r, "set network 10.24.1.77"), "Network set to 10.24.1.0/24");
        assert_eq!(r.config().network_addr, Ipv4Addr::new(10, 24, 1, 0));
        assert_eq!(run(&mut r, "set network 10.24.1"), "Invalid argument");
        assert_eq!(run(&mut r, "set ap_mac zz:00:00:00:00:00"), "Invalid argument");
    }

    #[test]
    fn test_dhcp_keyword_clears_addresses() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set ip 10.0.0.50"), "IP address set to 10.0.0.50");
        assert_eq!(run(&mut r, "set ip dhcp"), "IP from DHCP");
        assert!(r.config().my_addr.is_unspecified());
        assert_eq!(run(&mut r, "set dns 9.9.9.9"), "DNS set to 9.9.9.9");
        assert_eq!(r.platform.dhcp_server_dns, Ipv4Addr::new(9, 9, 9, 9));
        assert_eq!(run(&mut r, "set dns dhcp"), "DNS from DHCP");
    }

    #[test]
    fn test_sta_mac_random() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set sta_mac random"), "STA MAC randomized");
        assert!(r.config().sta_mac.is_random());
        assert_eq!(run(&mut r, "set sta_mac 2:0:0:a:b:c"), "STA MAC set");
        assert_eq!(r.config().sta_mac, MacAddr([2, 0, 0, 0x0a, 0x0b, 0x0c]));
    }

    #[test]
    fn test_ap_on_off() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set ap_on 1"), "AP already on");
        assert_eq!(run(&mut r, "set ap_on 0"), "AP off");
        assert_eq!(r.platform.opmode, Some(OpMode::Station));
        assert!(!r.state.ap_active);
        assert_eq!(run(&mut r, "set ap_on 1"), "AP on");
        assert!(r.state.supervisor.ip_config_pending);
    }

    #[test]
    fn test_nat_toggles_ap_interface() {
        let mut r = repeater();
        r.apply_softap_ip_config();
        assert_eq!(run(&mut r, "set nat 0"), "NAT disabled");
        assert_eq!(r.platform.napt.get(&AP_NETIF), Some(&false));
    }

    #[test]
    fn test_pins_and_speed() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set speed 160"), "Clock speed update successful");
        assert_eq!(r.config().clock_speed, 160);
        assert_eq!(run(&mut r, "set speed 120"), "Clock speed update failed");
        assert_eq!(r.config().clock_speed, 160);
        assert_eq!(run(&mut r, "set status_led 1"), "Status led set to GPIO 1");
        assert!(!r.platform.debug_output);
        assert_eq!(run(&mut r, "set status_led 255"), "Status led disabled");
        assert!(r.platform.debug_output);
        assert_eq!(run(&mut r, "set hw_reset 99"), "HW factory reset disabled");
        assert_eq!(run(&mut r, "set phy_mode 7"), "Phy mode setting failed");
        assert_eq!(r.config().phy_mode, 3);
    }

    #[test]
    fn test_unknown_and_disabled_keys() {
        let mut r = repeater();
        assert_eq!(run(&mut r, "set colour blue"), "\nInvalid Command");

        let mut r = Repeater::boot(
            SimPlatform::new(),
            MemoryFlash::new(REQUIRED_SECTORS),
            Capabilities::minimal(),
        );
        assert_eq!(run(&mut r, "set mqtt_host broker"), "\nInvalid Command");
        assert_eq!(run(&mut r, "set ap_ssid Guest"), "AP SSID set");
    }
}
