//! NAT port-map table, persisted as blob 0.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub const PORTMAP_MAX: usize = 32;
const ENTRY_LEN: usize = 16;

/// Size of the encoded table in its blob slot.
pub const PORTMAP_BLOB_LEN: usize = PORTMAP_MAX * ENTRY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn ip_proto(self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }

    fn from_ip_proto(n: u8) -> Option<Self> {
        match n {
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortmapEntry {
    pub protocol: Protocol,
    /// Address the mapping is reachable on (the station address).
    pub maddr: Ipv4Addr,
    pub mport: u16,
    pub daddr: Ipv4Addr,
    pub dport: u16,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortmapTable {
    slots: [Option<PortmapEntry>; PORTMAP_MAX],
}

impl Default for PortmapTable {
    fn default() -> Self {
        Self {
            slots: [None; PORTMAP_MAX],
        }
    }
}

impl PortmapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the mapping for `(protocol, mport)`. False when full.
    pub fn add(
        &mut self,
        protocol: Protocol,
        maddr: Ipv4Addr,
        mport: u16,
        daddr: Ipv4Addr,
        dport: u16,
    ) -> bool {
        let entry = PortmapEntry {
            protocol,
            maddr,
            mport,
            daddr,
            dport,
            valid: true,
        };
        let existing = self.slots.iter().position(|s| {
            matches!(s, Some(e) if e.valid && e.protocol == protocol && e.mport == mport)
        });
        let free = || self.slots.iter().position(|s| !matches!(s, Some(e) if e.valid));
        match existing.or_else(free) {
            Some(i) => {
                self.slots[i] = Some(entry);
                true
            }
            None => false,
        }
    }

    /// Invalidate the mapping for `(protocol, mport)`. False when absent.
    pub fn remove(&mut self, protocol: Protocol, mport: u16) -> bool {
        for entry in self.slots.iter_mut().flatten() {
            if entry.valid && entry.protocol == protocol && entry.mport == mport {
                entry.valid = false;
                return true;
            }
        }
        false
    }

    /// Point every valid mapping at a newly acquired station address.
    pub fn rewrite_mapped_address(&mut self, addr: Ipv4Addr) {
        for entry in self.slots.iter_mut().flatten().filter(|e| e.valid) {
            entry.maddr = addr;
        }
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = &PortmapEntry> {
        self.slots.iter().flatten().filter(|e| e.valid)
    }

    pub fn slots(&self) -> &[Option<PortmapEntry>] {
        &self.slots
    }

    pub fn slot_mut(&mut self, i: usize) -> Option<&mut Option<PortmapEntry>> {
        self.slots.get_mut(i)
    }

    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PORTMAP_BLOB_LEN);
        for slot in &self.slots {
            match slot {
                Some(e) => {
                    out.push(e.protocol.ip_proto());
                    out.push(u8::from(e.valid));
                    out.extend_from_slice(&e.mport.to_le_bytes());
                    out.extend_from_slice(&e.dport.to_le_bytes());
                    out.extend_from_slice(&[0, 0]);
                    out.extend_from_slice(&e.maddr.octets());
                    out.extend_from_slice(&e.daddr.octets());
                }
                None => out.extend_from_slice(&[0; ENTRY_LEN]),
            }
        }
        out
    }

    /// Decode a blob. Slots with an unknown protocol (zeroed or erased flash) stay empty.
    pub fn from_blob(data: &[u8]) -> Self {
        let mut table = Self::new();
        for (slot, raw) in table.slots.iter_mut().zip(data.chunks_exact(ENTRY_LEN)) {
            let Some(protocol) = Protocol::from_ip_proto(raw[0]) else {
                continue;
            };
            *slot = Some(PortmapEntry {
                protocol,
                valid: raw[1] == 1,
                mport: u16::from_le_bytes([raw[2], raw[3]]),
                dport: u16::from_le_bytes([raw[4], raw[5]]),
                maddr: Ipv4Addr::new(raw[8], raw[9], raw[10], raw[11]),
                daddr: Ipv4Addr::new(raw[12], raw[13], raw[14], raw[15]),
            });
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const A: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 23);
    const LAN: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 2);

    #[test]
    fn test_add_replaces_same_key() {
        let mut t = PortmapTable::new();
        assert!(t.add(Protocol::Tcp, A, 8080, LAN, 80));
        assert!(t.add(Protocol::Tcp, A, 8080, LAN, 8000));
        assert!(t.add(Protocol::Udp, A, 8080, LAN, 53));
        let entries: Vec<_> = t.valid_entries().map(|e| (e.protocol, e.dport)).collect();
        assert_eq!(entries, vec![(Protocol::Tcp, 8000), (Protocol::Udp, 53)]);
    }

    #[test]
    fn test_add_fails_when_full() {
        let mut t = PortmapTable::new();
        for port in 0..PORTMAP_MAX as u16 {
            assert!(t.add(Protocol::Tcp, A, 1000 + port, LAN, 80));
        }
        assert!(!t.add(Protocol::Tcp, A, 9999, LAN, 80));
        assert!(t.remove(Protocol::Tcp, 1000));
        assert!(t.add(Protocol::Tcp, A, 9999, LAN, 80));
    }

    #[test]
    fn test_remove_missing() {
        let mut t = PortmapTable::new();
        t.add(Protocol::Tcp, A, 22, LAN, 22);
        assert!(!t.remove(Protocol::Udp, 22));
        assert!(t.remove(Protocol::Tcp, 22));
        assert!(!t.remove(Protocol::Tcp, 22));
    }

    #[test]
    fn test_rewrite_touches_only_valid_entries() {
        let mut t = PortmapTable::new();
        t.add(Protocol::Tcp, A, 80, LAN, 80);
        t.add(Protocol::Udp, A, 53, LAN, 53);
        t.remove(Protocol::Udp, 53);

        t.rewrite_mapped_address(B);

        let slots: Vec<_> = t.slots().iter().flatten().map(|e| (e.valid, e.maddr)).collect();
        assert_eq!(slots, vec![(true, B), (false, A)]);
    }

    #[test]
    fn test_blob_keeps_invalid_entries() {
        let mut t = PortmapTable::new();
        t.add(Protocol::Tcp, A, 80, LAN, 8080);
        t.add(Protocol::Udp, A, 53, LAN, 53);
        t.remove(Protocol::Udp, 53);
        let blob = t.to_blob();
        assert_eq!(blob.len(), PORTMAP_BLOB_LEN);
        assert_eq!(PortmapTable::from_blob(&blob), t);
    }

    #[test]
    fn test_zeroed_and_erased_blobs_are_empty() {
        assert_eq!(PortmapTable::from_blob(&[0; PORTMAP_BLOB_LEN]), PortmapTable::new());
        assert_eq!(PortmapTable::from_blob(&[0xff; PORTMAP_BLOB_LEN]), PortmapTable::new());
    }
}
