//! Periodic supervisor.
//!
//! [`Repeater::tick`] runs one step and returns the delay until the next.
//! The delay alternates between [`LONG_TICK`] and [`SHORT_TICK`], which
//! gives both the LED heartbeat and a one second watchdog period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Repeater;
use crate::flash::Flash;
use crate::platform::Platform;
use crate::state::{Origin, PowerRequest};

pub const FIRST_TICK: Duration = Duration::from_millis(500);
pub const LONG_TICK: Duration = Duration::from_millis(900);
pub const SHORT_TICK: Duration = Duration::from_millis(100);

/// Consecutive asserted ticks before the reset button triggers.
pub const RESET_HOLD_TICKS: u32 = 6;

/// Settle time after a GPIO input edge.
pub const DEBOUNCE: Duration = Duration::from_millis(50);

/// Arming flag of the GPIO input interrupt.
///
/// The interrupt path calls [`InterruptGate::fire`]; only the first edge
/// after arming wins and schedules the debounce timer. The engine re-arms
/// the gate once the debounced level has been handled.
#[derive(Debug, Default)]
pub struct InterruptGate {
    armed: AtomicBool,
}

impl InterruptGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disarm; true when the gate was armed.
    pub fn fire(&self) -> bool {
        self.armed.swap(false, Ordering::AcqRel)
    }

    pub fn rearm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl<P: Platform, F: Flash> Repeater<P, F> {
    /// One supervisor step. Stops early once a restart or sleep is requested.
    pub fn tick(&mut self) -> Duration {
        let toggle = !self.state.supervisor.toggle;
        self.state.supervisor.toggle = toggle;
        let next = if toggle { LONG_TICK } else { SHORT_TICK };

        if toggle {
            self.tick_watchdogs();
            if self.state.power_request().is_some() {
                return next;
            }
        }

        self.poll_reset_button();
        if self.state.power_request().is_some() {
            return next;
        }

        if let Some(pin) = self.state.config.status_led_pin() {
            let on = toggle && self.state.is_connected();
            self.platform.gpio_write(pin, on);
        }

        if toggle {
            self.update_supply_voltage();
            if self.state.power_request().is_some() {
                return next;
            }
        }

        if self.state.supervisor.ip_config_pending {
            self.state.supervisor.ip_config_pending = false;
            self.apply_softap_ip_config();
        }

        next
    }

    fn tick_watchdogs(&mut self) {
        if self.state.ap_watchdog.tick() {
            warn!("AP watchdog expired, restarting");
            self.state.request_power(PowerRequest::Restart);
        }
        if self.state.client_watchdog.tick() {
            warn!("Client watchdog expired, restarting");
            self.state.request_power(PowerRequest::Restart);
        }
    }

    fn poll_reset_button(&mut self) {
        let Some(pin) = self.state.config.hw_reset_pin() else {
            return;
        };
        if self.platform.gpio_read(pin) {
            self.state.supervisor.reset_button_ticks = 0;
            return;
        }
        self.state.supervisor.reset_button_ticks += 1;
        if self.state.supervisor.reset_button_ticks > RESET_HOLD_TICKS {
            info!("Reset button held, restoring factory defaults");
            let reply = self.execute(Origin::Hardware, b"reset factory");
            info!("{}", reply.response.text());
        }
    }

    /// Exponential moving average with weight 1/4; sleeps below `vmin`.
    fn update_supply_voltage(&mut self) {
        let reading = self.platform.read_vdd();
        let vdd = (self.state.supervisor.vdd * 3 + reading) / 4;
        self.state.supervisor.vdd = vdd;

        let vmin = self.state.config.vmin;
        if !self.state.capabilities.sleep || vmin <= 0 || vdd >= vmin as u32 {
            return;
        }
        let secs = self.state.config.vmin_sleep.max(0) as u64;
        warn!("Supply voltage {vdd} mV below {vmin} mV, sleeping for {secs}s");
        self.state
            .request_power(PowerRequest::DeepSleep(Duration::from_secs(secs)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::flash::MemoryFlash;
    use crate::portmap::{Protocol, PORTMAP_BLOB_LEN};
    use crate::sim::SimPlatform;
    use crate::store::{ConfigStore, PORTMAP_BLOB, REQUIRED_SECTORS};
    use std::net::Ipv4Addr;

    fn repeater() -> Repeater<SimPlatform, MemoryFlash> {
        Repeater::boot(
            SimPlatform::new(),
            MemoryFlash::new(REQUIRED_SECTORS),
            Capabilities::all(),
        )
    }

    #[test]
    fn test_tick_alternates_intervals() {
        let mut r = repeater();
        assert_eq!(r.tick(), LONG_TICK);
        assert_eq!(r.tick(), SHORT_TICK);
        assert_eq!(r.tick(), LONG_TICK);
    }

    #[test]
    fn test_ap_watchdog_restarts_on_thirtieth_long_tick() {
        let mut r = repeater();
        r.state.config.ap_watchdog = 30;
        r.state.ap_watchdog.configure(30);

        let mut long_ticks = 0;
        while long_ticks < 29 {
            if r.tick() == LONG_TICK {
                long_ticks += 1;
            }
            assert_eq!(r.state.power_request(), None);
        }
        // Short phase never decrements.
        assert_eq!(r.tick(), SHORT_TICK);
        assert_eq!(r.state.power_request(), None);

        assert_eq!(r.tick(), LONG_TICK);
        assert_eq!(r.state.power_request(), Some(PowerRequest::Restart));
    }

    #[test]
    fn test_disabled_watchdogs_never_fire() {
        let mut r = repeater();
        for _ in 0..200 {
            r.tick();
        }
        assert_eq!(r.state.power_request(), None);
    }

    #[test]
    fn test_reset_button_needs_seven_asserted_ticks() {
        let mut r = repeater();
        r.state.config.hw_reset = 4;
        r.state.config.ssid = crate::FixedStr::truncated(b"home");
        r.state.portmaps.add(
            Protocol::Tcp,
            Ipv4Addr::new(10, 0, 0, 2),
            80,
            Ipv4Addr::new(192, 168, 4, 2),
            80,
        );
        r.persist().unwrap();
        r.state.config.locked = true;

        r.platform.set_level(4, false);
        for _ in 0..RESET_HOLD_TICKS {
            r.tick();
        }
        assert_eq!(r.state.power_request(), None);

        r.platform.set_level(4, true);
        r.tick();
        assert_eq!(r.state.supervisor.reset_button_ticks, 0);

        r.platform.set_level(4, false);
        for _ in 0..=RESET_HOLD_TICKS {
            r.tick();
        }
        assert_eq!(r.state.power_request(), Some(PowerRequest::Restart));

        let mut store = ConfigStore::new(r.store.flash().clone());
        let (saved, valid) = store.load();
        assert!(valid);
        assert_eq!(saved.ssid, "ssid");
        assert_eq!(saved.hw_reset, 4);
        let blob = store.blob_load(PORTMAP_BLOB, PORTMAP_BLOB_LEN).unwrap();
        assert!(blob.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_low_voltage_requests_sleep() {
        let mut r = repeater();
        r.state.config.vmin = 3000;
        r.state.config.vmin_sleep = 120;
        r.platform.vdd = 2000;

        // 3300 -> 2975 on the first long tick.
        r.tick();
        assert_eq!(r.state.supervisor.vdd, 2975);
        assert_eq!(
            r.state.power_request(),
            Some(PowerRequest::DeepSleep(Duration::from_secs(120)))
        );
    }

    #[test]
    fn test_voltage_ema_without_threshold() {
        let mut r = repeater();
        r.platform.vdd = 3100;
        r.tick();
        assert_eq!(r.state.supervisor.vdd, 3250);
        r.tick();
        assert_eq!(r.state.supervisor.vdd, 3250);
        assert_eq!(r.state.power_request(), None);
    }

    #[test]
    fn test_deferred_ip_config_applies_once() {
        let mut r = repeater();
        assert!(r.state.supervisor.ip_config_pending);
        r.tick();
        assert!(!r.state.supervisor.ip_config_pending);
        assert_eq!(r.platform.softap_ip_applied, 1);
        r.tick();
        r.tick();
        assert_eq!(r.platform.softap_ip_applied, 1);
    }

    #[test]
    fn test_status_led_follows_heartbeat_when_connected() {
        let mut r = repeater();
        r.tick();
        assert!(!r.platform.level(2));

        r.state.station = crate::state::StationLink::Connected {
            bssid: crate::MacAddr::ZERO,
            channel: 1,
            ip: crate::platform::IpInfo {
                ip: Ipv4Addr::new(10, 0, 0, 2),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gw: Ipv4Addr::new(10, 0, 0, 1),
            },
        };
        r.tick();
        assert!(!r.platform.level(2));
        r.tick();
        assert!(r.platform.level(2));
    }

    #[test]
    fn test_interrupt_gate_fires_once() {
        let gate = InterruptGate::new();
        assert!(!gate.fire());
        gate.rearm();
        assert!(gate.fire());
        assert!(!gate.fire());
    }
}
