//! Host simulator settings.
//!
//! Read from the JSON file named by `REPEATER_SETTINGS`. Every field is
//! optional. The repeater's own configuration lives in the flash image,
//! not here.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

pub const SETTINGS_ENV: &str = "REPEATER_SETTINGS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostSettings {
    /// File holding the simulated flash image.
    pub flash_image: PathBuf,
    /// Address the console and web listeners bind to.
    pub bind_addr: IpAddr,
    /// Read serial console lines from stdin.
    pub serial_console: bool,
    /// Simulated supply voltage in millivolts.
    pub supply_mv: u32,
    /// Address the simulated uplink hands out on connect.
    pub uplink: Option<UplinkSettings>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkSettings {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_channel() -> u8 {
    6
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            flash_image: PathBuf::from("repeater-flash.bin"),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            serial_console: true,
            supply_mv: 3300,
            uplink: None,
        }
    }
}

impl HostSettings {
    /// Settings from the file in `REPEATER_SETTINGS`, or defaults.
    pub fn load() -> anyhow::Result<Self> {
        let Ok(path) = std::env::var(SETTINGS_ENV) else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading settings from {path}"))?;
        Self::parse(&text).with_context(|| format!("parsing settings in {path}"))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
