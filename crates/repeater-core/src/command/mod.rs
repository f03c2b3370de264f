//! Command interpreter.
//!
//! A line is tokenized, matched against [`COMMANDS`], checked for argument
//! count and lock policy, then handed to its handler. Every outcome,
//! including errors, becomes exactly one [`Response`].

mod set;
mod show;

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::addr::parse_network;
use crate::capabilities::Feature;
use crate::config::{ConfigRecord, DhcpLease, MAX_DHCP};
use crate::engine::Repeater;
use crate::fixed::{FixedStr, TooLong};
use crate::flash::Flash;
use crate::network::PING_COUNT;
use crate::platform::{Platform, RouteEntry};
use crate::portmap::{Protocol, PORTMAP_BLOB_LEN};
use crate::response::Response;
use crate::state::{Origin, PowerRequest, Reply};
use crate::store::PORTMAP_BLOB;
use crate::tokenizer::{tokenize, Tokens};

/// Sleep length when `sleep` is given no argument.
const DEFAULT_SLEEP_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Invalid command. Config locked")]
    Locked,
    #[error("Invalid number of arguments")]
    NumArgs,
    #[error("Invalid argument")]
    InvalidArg,
    #[error("Invalid Command")]
    Unknown,
    #[error(transparent)]
    TooLong(#[from] TooLong),
    /// A domain check failed; the message is the full response.
    #[error("{0}")]
    Rejected(String),
    #[error("Save failed: {0}")]
    Storage(String),
}

impl CommandError {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        CommandError::Rejected(message.into())
    }
}

impl From<CommandError> for Response {
    fn from(err: CommandError) -> Self {
        match err {
            // Unknown commands answer with a blank line first.
            CommandError::Unknown => {
                let mut r = Response::line("");
                r.push(err.to_string());
                r
            }
            other => Response::line(other.to_string()),
        }
    }
}

pub type CommandResult = Result<Response, CommandError>;

/// How a command interacts with the configuration lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Never refused.
    Open,
    /// Refused while locked.
    Gated,
    /// Refused while locked, but only for network sessions.
    NetworkGated,
    /// Implements its own transitions.
    SelfManaged,
}

/// Accepted token counts, the command word included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(e) => n == e,
            Arity::AtLeast(min) => n >= min,
            Arity::Between(min, max) => (min..=max).contains(&n),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub lock: LockPolicy,
    pub arity: Arity,
    pub requires: Option<Feature>,
}

const fn cmd(
    name: &'static str,
    lock: LockPolicy,
    arity: Arity,
    requires: Option<Feature>,
) -> CommandSpec {
    CommandSpec {
        name,
        lock,
        arity,
        requires,
    }
}

pub const COMMANDS: &[CommandSpec] = &[
    cmd("help", LockPolicy::Open, Arity::Exact(1), None),
    cmd("show", LockPolicy::Open, Arity::Between(1, 2), None),
    cmd("set", LockPolicy::Gated, Arity::AtLeast(3), None),
    cmd("save", LockPolicy::Gated, Arity::Between(1, 2), None),
    cmd("route", LockPolicy::Gated, Arity::AtLeast(2), None),
    cmd("portmap", LockPolicy::Gated, Arity::AtLeast(4), None),
    cmd("connect", LockPolicy::Gated, Arity::Exact(1), None),
    cmd("disconnect", LockPolicy::Gated, Arity::Exact(1), None),
    cmd("interface", LockPolicy::Gated, Arity::Exact(3), None),
    cmd("scan", LockPolicy::Open, Arity::Exact(1), Some(Feature::Scanning)),
    cmd("ping", LockPolicy::Open, Arity::Exact(2), Some(Feature::Ping)),
    cmd("reset", LockPolicy::NetworkGated, Arity::Between(1, 2), None),
    cmd("quit", LockPolicy::Open, Arity::Exact(1), None),
    cmd("sleep", LockPolicy::Open, Arity::Between(1, 2), Some(Feature::Sleep)),
    cmd("lock", LockPolicy::SelfManaged, Arity::Between(1, 2), None),
    cmd("unlock", LockPolicy::SelfManaged, Arity::Exact(2), None),
];

/// Lock policy of a command word, if it is a command.
pub fn lock_policy(name: &str) -> Option<LockPolicy> {
    COMMANDS.iter().find(|c| c.name == name).map(|c| c.lock)
}

// ============================================================================
// Argument parsing
// ============================================================================

pub(crate) fn arg_str<'a>(tokens: &'a Tokens, i: usize) -> Result<&'a str, CommandError> {
    tokens.str(i).ok_or(CommandError::InvalidArg)
}

pub(crate) fn arg_num<T: std::str::FromStr>(tokens: &Tokens, i: usize) -> Result<T, CommandError> {
    arg_str(tokens, i)?
        .parse()
        .map_err(|_| CommandError::InvalidArg)
}

pub(crate) fn arg_ip(tokens: &Tokens, i: usize) -> Result<Ipv4Addr, CommandError> {
    arg_num(tokens, i)
}

/// A string value that must fit its field.
pub(crate) fn arg_fixed<const N: usize>(
    tokens: &Tokens,
    i: usize,
) -> Result<FixedStr<N>, CommandError> {
    let raw = tokens.get(i).ok_or(CommandError::InvalidArg)?;
    Ok(FixedStr::new(raw)?)
}

impl<P: Platform, F: Flash> Repeater<P, F> {
    /// Run one console line on behalf of `origin`.
    pub fn execute(&mut self, origin: Origin, line: &[u8]) -> Reply {
        self.try_execute(origin, line).unwrap_or_else(|err| {
            debug!("Command from {origin:?} failed: {err}");
            Reply::new(origin, err.into())
        })
    }

    /// [`execute`](Self::execute) for callers that act on success, such as
    /// the web page deciding whether to save.
    pub fn try_execute(&mut self, origin: Origin, line: &[u8]) -> Result<Reply, CommandError> {
        let tokens = tokenize(line);
        if tokens.is_empty() {
            return Ok(Reply::new(origin, Response::new()));
        }

        let mut close = false;
        let response = self.run(origin, &tokens, &mut close)?;
        Ok(Reply {
            to: origin,
            response,
            close,
        })
    }

    fn run(&mut self, origin: Origin, tokens: &Tokens, close: &mut bool) -> CommandResult {
        let caps = self.state.capabilities;
        let spec = COMMANDS
            .iter()
            .find(|c| tokens.is(0, c.name))
            .filter(|c| c.requires.map_or(true, |f| caps.has(f)))
            .ok_or(CommandError::Unknown)?;
        debug!("Command {} from {origin:?}", spec.name);

        if !spec.arity.accepts(tokens.len()) {
            return Err(CommandError::NumArgs);
        }
        let locked = self.state.config.locked;
        let refused = match spec.lock {
            LockPolicy::Gated => locked,
            LockPolicy::NetworkGated => locked && origin.is_network(),
            LockPolicy::Open | LockPolicy::SelfManaged => false,
        };
        if refused {
            info!("Refused {} from {origin:?}: config locked", spec.name);
            return Err(CommandError::Locked);
        }

        match spec.name {
            "help" => Ok(self.cmd_help()),
            "show" => self.cmd_show(tokens),
            "set" => self.cmd_set(tokens),
            "save" => self.cmd_save(tokens),
            "route" => self.cmd_route(tokens),
            "portmap" => self.cmd_portmap(tokens),
            "connect" => Ok(self.cmd_connect()),
            "disconnect" => {
                self.platform.station_disconnect();
                Ok(Response::line("Disconnect from ssid"))
            }
            "interface" => self.cmd_interface(tokens),
            "scan" => self.cmd_scan(origin),
            "ping" => self.cmd_ping(origin, tokens),
            "reset" => self.cmd_reset(origin, tokens),
            "quit" => {
                *close = matches!(origin, Origin::Remote(_));
                Ok(Response::line("Quitting console"))
            }
            "sleep" => self.cmd_sleep(tokens),
            "lock" => self.cmd_lock(tokens),
            "unlock" => self.cmd_unlock(tokens),
            _ => Err(CommandError::Unknown),
        }
    }

    fn cmd_help(&self) -> Response {
        let caps = self.state.capabilities;
        let mut r = Response::new();
        r.push(format!(
            "show [config|stats|route|dhcp{}]",
            if caps.telemetry { "|mqtt" } else { "" }
        ));
        r.push("set [ssid|password|auto_connect|ap_ssid|ap_password|ap_on|ap_open|nat] <val>");
        if caps.peap {
            r.push("set [use_peap|peap_identity|peap_username|peap_password] <val>");
        }
        r.push("set [ap_mac|sta_mac|bssid|ssid_hidden|sta_hostname|max_clients] <val>");
        r.push("set [network|dns|ip|netmask|gw] <val>");
        if caps.ethernet {
            r.push("set [eth_enable|eth_ip|eth_netmask|eth_gw|eth_mac] <val>");
        }
        r.push("route clear|route add <network> <gw>|route delete <network>");
        r.push("interface <int> [up|down]");
        r.push("portmap [add|remove] [TCP|UDP] <ext_port> <int_addr> <int_port>");
        if caps.ping {
            r.push("ping <ip_addr>");
        }
        let mut system = vec!["speed", "status_led", "hw_reset"];
        if caps.remote_console {
            system.extend(["config_port", "config_access"]);
        }
        if caps.web {
            system.push("web_port");
        }
        r.push(format!("set [{}] <val>", system.join("|")));
        r.push("save [config|dhcp]");
        r.push("connect|disconnect|reset [factory]|lock|unlock <password>|quit");
        r.push("set [client_watchdog|ap_watchdog] <val>");
        if caps.scanning {
            r.push("scan");
        }
        if caps.phy_mode {
            r.push("set phy_mode [1|2|3]");
        }
        if caps.sleep {
            r.push("sleep <secs>");
            r.push("set [vmin|vmin_sleep] <val>");
        }
        if caps.telemetry {
            r.push("set [mqtt_host|mqtt_port|mqtt_user|mqtt_password|mqtt_id|mqtt_sub_topic|mqtt_pub_topic] <val>");
        }
        if caps.gpio {
            r.push("set gpio_out <val>");
        }
        r
    }

    fn save_all(&mut self) -> Result<(), CommandError> {
        self.persist().map_err(|e| {
            error!("Saving config failed: {e}");
            CommandError::Storage(e.to_string())
        })
    }

    fn cmd_save(&mut self, tokens: &Tokens) -> CommandResult {
        if tokens.len() == 1 || tokens.is(1, "config") {
            self.save_all()?;
            return Ok(Response::line("Config saved"));
        }
        if tokens.is(1, "dhcp") {
            self.state.config.dhcp_leases = self
                .platform
                .softap_stations()
                .into_iter()
                .take(MAX_DHCP)
                .map(|s| DhcpLease {
                    mac: s.mac,
                    ip: s.ip,
                })
                .collect();
            self.save_all()?;
            return Ok(Response::line("Config and DHCP table saved"));
        }
        Err(CommandError::InvalidArg)
    }

    fn cmd_route(&mut self, tokens: &Tokens) -> CommandResult {
        let need = match tokens.str(1) {
            Some("clear") => 2,
            Some("delete") => 3,
            Some("add") => 4,
            _ => return Err(CommandError::InvalidArg),
        };
        if tokens.len() != need {
            return Err(CommandError::NumArgs);
        }

        if tokens.is(1, "clear") {
            self.platform.clear_routes();
            return Ok(Response::line("All routes cleared"));
        }

        let (network, mask) =
            parse_network(arg_str(tokens, 2)?).ok_or(CommandError::InvalidArg)?;
        if tokens.is(1, "delete") {
            return Ok(if self.platform.remove_route(network, mask) {
                Response::line("Route deleted")
            } else {
                Response::line("Route not found")
            });
        }

        let (gw, _) = parse_network(arg_str(tokens, 3)?).ok_or(CommandError::InvalidArg)?;
        let added = self.platform.add_route(RouteEntry { network, mask, gw });
        Ok(Response::line(if added {
            "Route added"
        } else {
            "Route add failed"
        }))
    }

    fn cmd_portmap(&mut self, tokens: &Tokens) -> CommandResult {
        let protocol: Protocol = arg_num(tokens, 2)?;
        let mport: u16 = arg_num(tokens, 3)?;

        if tokens.is(1, "add") {
            if tokens.len() != 6 {
                return Err(CommandError::NumArgs);
            }
            let daddr = arg_ip(tokens, 4)?;
            let dport: u16 = arg_num(tokens, 5)?;
            let maddr = self.state.my_ip();
            let added = self
                .state
                .portmaps
                .add(protocol, maddr, mport, daddr, dport);
            if !added {
                return Err(CommandError::rejected("Portmap failed"));
            }
            self.platform.apply_portmaps(&self.state.portmaps);
            return Ok(Response::line("Portmap set"));
        }

        if tokens.is(1, "remove") {
            if tokens.len() != 4 {
                return Err(CommandError::NumArgs);
            }
            if !self.state.portmaps.remove(protocol, mport) {
                return Err(CommandError::rejected("Portmap failed"));
            }
            self.platform.apply_portmaps(&self.state.portmaps);
            return Ok(Response::line("Portmap deleted"));
        }

        Err(CommandError::InvalidArg)
    }

    fn cmd_connect(&mut self) -> Response {
        self.apply_station_config();
        self.platform.station_disconnect();
        self.platform.station_connect();
        let cfg = &self.state.config;
        Response::line(format!(
            "Trying to connect to ssid {}, password: {}",
            cfg.ssid, cfg.password
        ))
    }

    fn cmd_interface(&mut self, tokens: &Tokens) -> CommandResult {
        let name = arg_str(tokens, 1)?;
        let iface = self
            .platform
            .interfaces()
            .into_iter()
            .find(|i| i.label() == name)
            .ok_or_else(|| CommandError::rejected("Invalid interface"))?;
        let up = match tokens.str(2) {
            Some("up") => true,
            Some("down") => false,
            _ => return Err(CommandError::InvalidArg),
        };
        self.platform.set_interface_up(iface.id, up);
        Ok(Response::line(format!(
            "Interface {} {}",
            iface.label(),
            if up { "up" } else { "down" }
        )))
    }

    fn cmd_scan(&mut self, origin: Origin) -> CommandResult {
        self.state.scan_target = Some(origin);
        if !self.platform.start_scan() {
            self.state.scan_target = None;
            return Err(CommandError::rejected("scan fail !!!"));
        }
        // Results follow later with their own prompt.
        Ok(Response::raw("Scanning..."))
    }

    fn cmd_ping(&mut self, origin: Origin, tokens: &Tokens) -> CommandResult {
        let target = arg_ip(tokens, 1)?;
        self.state.ping_target = Some(origin);
        if !self.platform.start_ping(target, PING_COUNT) {
            self.state.ping_target = None;
            return Err(CommandError::rejected("ping failed"));
        }
        Ok(Response::raw(format!("Pinging {target}")))
    }

    fn cmd_reset(&mut self, origin: Origin, tokens: &Tokens) -> CommandResult {
        // Only `factory` restores defaults. Any other argument is a plain restart.
        if tokens.is(1, "factory") {
            // The button keeps its pin so it stays usable after the reset.
            self.state.config = if origin == Origin::Hardware {
                self.state.config.factory_reset_keeping_pin()
            } else {
                ConfigRecord::defaults()
            };
            if let Err(e) = self.store.save(&self.state.config) {
                error!("Saving defaults failed: {e}");
            }
            if let Err(e) = self.store.blob_zero(PORTMAP_BLOB, PORTMAP_BLOB_LEN) {
                error!("Clearing port map table failed: {e}");
            }
            info!("Factory reset requested by {origin:?}");
        }
        self.state.request_power(PowerRequest::Restart);
        Ok(Response::line("Restarting ..."))
    }

    fn cmd_sleep(&mut self, tokens: &Tokens) -> CommandResult {
        let secs = if tokens.len() == 2 {
            arg_num(tokens, 1)?
        } else {
            DEFAULT_SLEEP_SECS
        };
        self.state
            .request_power(PowerRequest::DeepSleep(Duration::from_secs(secs)));
        Ok(Response::line(format!("Going to deep sleep for {secs}s")))
    }

    fn cmd_lock(&mut self, tokens: &Tokens) -> CommandResult {
        if self.state.config.locked {
            return Err(CommandError::rejected("Config already locked"));
        }
        if tokens.len() == 2 {
            self.state.config.lock_password = arg_fixed(tokens, 1)?;
        } else if self.state.config.lock_password.is_empty() {
            return Err(CommandError::rejected("No password defined"));
        }
        self.state.config.locked = true;
        if let Err(e) = self.store.save(&self.state.config) {
            warn!("Lock state not persisted: {e}");
        }
        info!("Config locked");
        Ok(Response::line("Config locked"))
    }

    fn cmd_unlock(&mut self, tokens: &Tokens) -> CommandResult {
        let given = tokens.get(1).ok_or(CommandError::InvalidArg)?;
        if given != self.state.config.lock_password.as_bytes() {
            warn!("Unlock attempt with wrong password");
            return Err(CommandError::rejected("Unlock failed. Invalid password"));
        }
        self.state.config.locked = false;
        if let Err(e) = self.store.save(&self.state.config) {
            warn!("Lock state not persisted: {e}");
        }
        info!("Config unlocked");
        Ok(Response::line("Config unlocked"))
    }
}
