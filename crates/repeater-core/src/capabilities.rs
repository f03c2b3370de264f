//! Optional features, chosen once at startup.
//!
//! A disabled capability removes its commands (they answer like unknown
//! commands), its `set` keys and its `show` lines. Its record fields stay in
//! the persisted schema so enabling it later does not invalidate flash.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub telemetry: bool,
    pub web: bool,
    pub remote_console: bool,
    pub peap: bool,
    pub ethernet: bool,
    pub scanning: bool,
    pub ping: bool,
    pub sleep: bool,
    pub phy_mode: bool,
    pub gpio: bool,
}

impl Capabilities {
    pub const fn all() -> Self {
        Self {
            telemetry: true,
            web: true,
            remote_console: true,
            peap: true,
            ethernet: true,
            scanning: true,
            ping: true,
            sleep: true,
            phy_mode: true,
            gpio: true,
        }
    }

    /// Only the always-present core: serial console, config and routing.
    pub const fn minimal() -> Self {
        Self {
            telemetry: false,
            web: false,
            remote_console: false,
            peap: false,
            ethernet: false,
            scanning: false,
            ping: false,
            sleep: false,
            phy_mode: false,
            gpio: false,
        }
    }
}

/// Selector for one optional capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Telemetry,
    Web,
    RemoteConsole,
    Peap,
    Ethernet,
    Scanning,
    Ping,
    Sleep,
    PhyMode,
    Gpio,
}

impl Capabilities {
    pub fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::Telemetry => self.telemetry,
            Feature::Web => self.web,
            Feature::RemoteConsole => self.remote_console,
            Feature::Peap => self.peap,
            Feature::Ethernet => self.ethernet,
            Feature::Scanning => self.scanning,
            Feature::Ping => self.ping,
            Feature::Sleep => self.sleep,
            Feature::PhyMode => self.phy_mode,
            Feature::Gpio => self.gpio,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}
