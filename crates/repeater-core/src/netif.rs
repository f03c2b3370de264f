//! Interface handler patching.
//!
//! The IP stack hands every packet of an interface to an input and an output
//! handler. Patching wraps the installed handler in a [`CountingHandler`]
//! that updates traffic counters and feeds a watchdog before delegating to
//! the captured original. Installation is guarded by pointer identity, so
//! patching the same interface again is a no-op.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::WATCHDOG_OFF;

/// Index of an interface in the IP stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetifId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetifError {
    #[error("interface is down")]
    Down,
    #[error("packet dropped: {0}")]
    Dropped(String),
}

pub trait PacketHandler: Send + Sync {
    fn handle(&self, packet: &[u8]) -> Result<(), NetifError>;
}

pub type HandlerRef = Arc<dyn PacketHandler>;

/// Access to the handler slots of the IP stack's interfaces.
pub trait NetifHandlers {
    fn handler(&self, netif: NetifId, direction: Direction) -> Option<HandlerRef>;

    fn set_handler(&mut self, netif: NetifId, direction: Direction, handler: HandlerRef);
}

fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
pub struct TrafficCounters {
    bytes_in: AtomicU64,
    packets_in: AtomicU32,
    bytes_out: AtomicU64,
    packets_out: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficSnapshot {
    pub bytes_in: u64,
    pub packets_in: u32,
    pub bytes_out: u64,
    pub packets_out: u32,
}

impl TrafficCounters {
    pub fn record(&self, direction: Direction, len: usize) {
        let (bytes, packets) = match direction {
            Direction::Input => (&self.bytes_in, &self.packets_in),
            Direction::Output => (&self.bytes_out, &self.packets_out),
        };
        bytes.fetch_add(len as u64, Ordering::Relaxed);
        packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            packets_in: self.packets_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
        }
    }
}

/// Countdown that expires unless fed by traffic. `-1` means disabled.
#[derive(Debug)]
pub struct Watchdog {
    threshold: AtomicI32,
    remaining: AtomicI32,
}

impl Watchdog {
    pub fn new(threshold: i32) -> Self {
        Self {
            threshold: AtomicI32::new(threshold),
            remaining: AtomicI32::new(threshold),
        }
    }

    /// Change the threshold and restart the countdown from it.
    pub fn configure(&self, threshold: i32) {
        self.threshold.store(threshold, Ordering::Relaxed);
        self.remaining.store(threshold, Ordering::Relaxed);
    }

    pub fn feed(&self) {
        self.remaining
            .store(self.threshold.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    pub fn remaining(&self) -> i32 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Count one second down. True exactly when the countdown reaches zero.
    pub fn tick(&self) -> bool {
        let now = self.remaining.load(Ordering::Relaxed);
        if now <= WATCHDOG_OFF {
            return false;
        }
        let next = now - 1;
        self.remaining.store(next, Ordering::Relaxed);
        next == 0
    }
}

// ============================================================================
// Decorator
// ============================================================================

/// Side effects a patched handler performs per packet.
#[derive(Clone, Default)]
pub struct Instrumentation {
    pub counters: Option<Arc<TrafficCounters>>,
    pub feeds: Option<Arc<Watchdog>>,
}

pub struct CountingHandler {
    inner: HandlerRef,
    direction: Direction,
    instrumentation: Instrumentation,
}

impl PacketHandler for CountingHandler {
    fn handle(&self, packet: &[u8]) -> Result<(), NetifError> {
        if let Some(counters) = &self.instrumentation.counters {
            counters.record(self.direction, packet.len());
        }
        if let Some(watchdog) = &self.instrumentation.feeds {
            watchdog.feed();
        }
        self.inner.handle(packet)
    }
}

#[derive(Default)]
struct Slot {
    original: Option<HandlerRef>,
    installed: Option<HandlerRef>,
}

/// One patched interface: its id and the original handlers captured at patch time.
#[derive(Default)]
pub struct NetifBinding {
    netif: Option<NetifId>,
    input: Slot,
    output: Slot,
}

impl NetifBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn netif(&self) -> Option<NetifId> {
        self.netif
    }

    pub fn original(&self, direction: Direction) -> Option<&HandlerRef> {
        self.slot(direction).original.as_ref()
    }

    fn slot(&self, direction: Direction) -> &Slot {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Slot {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    /// Wrap the handlers of `netif`. Directions given `None` are left alone.
    /// Returns whether any handler was newly installed.
    pub fn patch<S: NetifHandlers + ?Sized>(
        &mut self,
        stack: &mut S,
        netif: NetifId,
        input: Option<Instrumentation>,
        output: Option<Instrumentation>,
    ) -> bool {
        self.netif = Some(netif);
        let mut changed = false;
        if let Some(instrumentation) = input {
            changed |= self.patch_one(stack, netif, Direction::Input, instrumentation);
        }
        if let Some(instrumentation) = output {
            changed |= self.patch_one(stack, netif, Direction::Output, instrumentation);
        }
        changed
    }

    fn patch_one<S: NetifHandlers + ?Sized>(
        &mut self,
        stack: &mut S,
        netif: NetifId,
        direction: Direction,
        instrumentation: Instrumentation,
    ) -> bool {
        let Some(current) = stack.handler(netif, direction) else {
            return false;
        };
        let slot = self.slot_mut(direction);
        if let Some(installed) = &slot.installed {
            if same_handler(&current, installed) {
                return false;
            }
        }

        let wrapper: HandlerRef = Arc::new(CountingHandler {
            inner: current.clone(),
            direction,
            instrumentation,
        });
        stack.set_handler(netif, direction, wrapper.clone());
        slot.original = Some(current);
        slot.installed = Some(wrapper);
        debug!("Patched {:?} handler of netif {}", direction, netif.0);
        true
    }

    /// Put the captured originals back if our wrappers are still installed.
    pub fn restore<S: NetifHandlers + ?Sized>(&mut self, stack: &mut S) {
        let Some(netif) = self.netif else {
            return;
        };
        for direction in [Direction::Input, Direction::Output] {
            let current = stack.handler(netif, direction);
            let slot = self.slot_mut(direction);
            if let (Some(current), Some(installed), Some(original)) =
                (current, slot.installed.take(), slot.original.take())
            {
                if same_handler(&current, &installed) {
                    stack.set_handler(netif, direction, original);
                }
            }
        }
    }
}
