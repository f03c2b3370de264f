//! Units of work posted to the engine's queue.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::addr::MacAddr;
use crate::fixed::FixedStr;
use crate::state::Origin;

/// Radio driver events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    StationConnected {
        ssid: FixedStr<32>,
        bssid: MacAddr,
        channel: u8,
    },
    StationGotIp {
        ip: Ipv4Addr,
        mask: Ipv4Addr,
        gw: Ipv4Addr,
    },
    StationDisconnected {
        ssid: FixedStr<32>,
        reason: u8,
    },
    ApStationJoined {
        mac: MacAddr,
        aid: u8,
    },
    ApStationLeft {
        mac: MacAddr,
        aid: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Open = 0,
    Wep = 1,
    WpaPsk = 2,
    Wpa2Psk = 3,
    WpaWpa2Psk = 4,
}

/// One access point seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssInfo {
    pub authmode: AuthMode,
    pub ssid: FixedStr<33>,
    pub rssi: i8,
    pub bssid: MacAddr,
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A complete command line from a console transport.
    Console { origin: Origin, line: Vec<u8> },
    Radio(RadioEvent),
    /// Scan finished; `None` when the driver reported failure.
    ScanDone(Option<Vec<BssInfo>>),
    PingReply {
        ok: bool,
        bytes: u32,
        time: Duration,
    },
    PingDone { received: u32, sent: u32 },
    Telemetry(TelemetryEvent),
    /// The GPIO input debounce timer expired with the sampled level.
    GpioDebounced { level: bool },
    /// The station has an address; dependent services may start.
    NetworkReady,
}
