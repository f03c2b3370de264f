//! Runtime state owned by the engine.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crate::addr::MacAddr;
use crate::capabilities::Capabilities;
use crate::config::{ConfigRecord, DEFAULT_DNS};
use crate::netif::{NetifBinding, TrafficCounters, Watchdog};
use crate::platform::IpInfo;
use crate::portmap::PortmapTable;
use crate::response::Response;
use crate::signal::Signal;
use crate::supervisor::InterruptGate;

/// Identifies one TCP console connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

/// Where a command came from. Drives lock policy and reply routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Serial,
    Remote(SessionId),
    Web,
    /// Issued by the device itself (debounced reset button).
    Hardware,
}

impl Origin {
    /// Sessions reached over the network rather than physical access.
    pub fn is_network(&self) -> bool {
        matches!(self, Origin::Remote(_) | Origin::Web)
    }
}

/// Output addressed to one console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub to: Origin,
    pub response: Response,
    /// Close the session after sending.
    pub close: bool,
}

impl Reply {
    pub fn new(to: Origin, response: Response) -> Self {
        Self {
            to,
            response,
            close: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    Restart,
    DeepSleep(Duration),
}

/// Station side link. The AP side is tracked separately in [`State::ap_active`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationLink {
    Disconnected,
    /// Associated, waiting for an address.
    Associated { bssid: MacAddr, channel: u8 },
    Connected {
        bssid: MacAddr,
        channel: u8,
        ip: IpInfo,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorState {
    /// Heartbeat phase; true selects the long interval.
    pub toggle: bool,
    pub reset_button_ticks: u32,
    /// Smoothed supply voltage in millivolts.
    pub vdd: u32,
    /// AP subnet configuration still has to be pushed to the stack.
    pub ip_config_pending: bool,
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self {
            toggle: false,
            reset_button_ticks: 0,
            vdd: 3300,
            ip_config_pending: false,
        }
    }
}

pub struct State {
    pub config: ConfigRecord,
    pub portmaps: PortmapTable,
    pub capabilities: Capabilities,

    pub station: StationLink,
    pub ap_active: bool,
    /// Set when the uplink BSSID differs from the pinned one.
    pub bssid_mismatch: bool,
    pub dns: Ipv4Addr,

    pub traffic: Arc<TrafficCounters>,
    pub ap_watchdog: Arc<Watchdog>,
    pub client_watchdog: Arc<Watchdog>,
    pub sta_binding: NetifBinding,
    pub ap_binding: NetifBinding,

    pub supervisor: SupervisorState,
    pub gpio_gate: Arc<InterruptGate>,

    /// Console waiting for scan results.
    pub scan_target: Option<Origin>,
    /// Console waiting for ping results.
    pub ping_target: Option<Origin>,

    power: Option<PowerRequest>,
    outbox: Vec<Signal>,
}

impl State {
    pub fn new(config: ConfigRecord, portmaps: PortmapTable, capabilities: Capabilities) -> Self {
        let dns = if config.dns_addr.is_unspecified() {
            DEFAULT_DNS
        } else {
            config.dns_addr
        };
        Self {
            ap_watchdog: Arc::new(Watchdog::new(config.ap_watchdog)),
            client_watchdog: Arc::new(Watchdog::new(config.client_watchdog)),
            config,
            portmaps,
            capabilities,
            station: StationLink::Disconnected,
            ap_active: false,
            bssid_mismatch: false,
            dns,
            traffic: Arc::new(TrafficCounters::default()),
            sta_binding: NetifBinding::new(),
            ap_binding: NetifBinding::new(),
            supervisor: SupervisorState::default(),
            gpio_gate: Arc::new(InterruptGate::new()),
            scan_target: None,
            ping_target: None,
            power: None,
            outbox: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.station, StationLink::Connected { .. })
    }

    /// Station address, unspecified while not connected.
    pub fn my_ip(&self) -> Ipv4Addr {
        match self.station {
            StationLink::Connected { ip, .. } => ip.ip,
            _ => Ipv4Addr::UNSPECIFIED,
        }
    }

    pub fn station_ip_info(&self) -> Option<IpInfo> {
        match self.station {
            StationLink::Connected { ip, .. } => Some(ip),
            _ => None,
        }
    }

    pub fn uplink_bssid(&self) -> Option<MacAddr> {
        match self.station {
            StationLink::Associated { bssid, .. } | StationLink::Connected { bssid, .. } => {
                Some(bssid)
            }
            StationLink::Disconnected => None,
        }
    }

    /// Record a restart or sleep. The first request of a unit of work wins.
    pub fn request_power(&mut self, request: PowerRequest) {
        if self.power.is_none() {
            self.power = Some(request);
        }
    }

    pub fn power_request(&self) -> Option<PowerRequest> {
        self.power
    }

    pub fn take_power_request(&mut self) -> Option<PowerRequest> {
        self.power.take()
    }

    /// Queue a follow-up signal for the runtime to post.
    pub fn post(&mut self, signal: Signal) {
        self.outbox.push(signal);
    }

    pub fn drain_outbox(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.outbox)
    }
}
