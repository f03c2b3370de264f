//! MAC and IPv4 address helpers shared by the commands and the record codec.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// A 48-bit hardware address. All zero means "use the factory address".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Stored in the station MAC field to request a random address at boot.
    pub const RANDOM: MacAddr = MacAddr(*b"random");

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    pub fn is_random(&self) -> bool {
        *self == Self::RANDOM
    }

    /// Force a random address into the unicast, locally administered range.
    pub fn locally_administered(mut bytes: [u8; 6]) -> Self {
        bytes[0] = (bytes[0] & 0xfe) | 0x02;
        MacAddr(bytes)
    }
}

impl FromStr for MacAddr {
    type Err = ();

    /// Parses `xx:xx:xx:xx:xx:xx`, one or two hex digits per octet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for slot in out.iter_mut() {
            let part = parts.next().ok_or(())?;
            if part.is_empty() || part.len() > 2 {
                return Err(());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| ())?;
        }
        if parts.next().is_some() {
            return Err(());
        }
        Ok(MacAddr(out))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_random() {
            serializer.serialize_str("random")
        } else {
            serializer.collect_str(self)
        }
    }
}

/// Netmask for a prefix length; lengths above 32 saturate.
pub fn prefix_to_mask(len: u8) -> Ipv4Addr {
    let len = u32::from(len.min(32));
    if len == 0 {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::from(u32::MAX << (32 - len))
    }
}

pub fn mask_to_prefix(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

/// Parse `any`, `a.b.c.d` (host route) or `a.b.c.d/nn` into address and mask.
pub fn parse_network(s: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    if s == "any" {
        return Some((Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED));
    }
    match s.split_once('/') {
        Some((addr, len)) => {
            let len: u8 = len.parse().ok().filter(|l| *l <= 32)?;
            Some((addr.parse().ok()?, prefix_to_mask(len)))
        }
        None => Some((s.parse().ok()?, Ipv4Addr::BROADCAST)),
    }
}

/// Inverse of [`parse_network`].
pub fn format_network(addr: Ipv4Addr, mask: Ipv4Addr) -> String {
    if addr.is_unspecified() && mask.is_unspecified() {
        return "any".to_string();
    }
    let prefix = mask_to_prefix(mask);
    if prefix < 32 {
        format!("{addr}/{prefix}")
    } else {
        addr.to_string()
    }
}

/// Address of the AP side of `network` (its `.1` host).
pub fn ap_address(network: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = network.octets();
    Ipv4Addr::new(a, b, c, 1)
}

/// Whether two addresses share their first three octets.
pub fn same_slash24(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    a.octets()[..3] == b.octets()[..3]
}
