//! Which side of the repeater a network peer sits on.

use std::net::{IpAddr, Ipv4Addr};

use repeater_core::config::{LOCAL_ACCESS, REMOTE_ACCESS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Inside the AP subnet.
    Local,
    /// Reached through the uplink.
    Remote,
}

/// A peer is local when its first three octets match the AP network.
pub fn classify(peer: IpAddr, network: Ipv4Addr) -> Access {
    let peer = match peer {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4,
            None => return Access::Remote,
        },
    };
    if peer.octets()[..3] == network.octets()[..3] {
        Access::Local
    } else {
        Access::Remote
    }
}

impl Access {
    /// Whether the `config_access` bits admit this side.
    pub fn allowed(self, config_access: u8) -> bool {
        let bit = match self {
            Access::Local => LOCAL_ACCESS,
            Access::Remote => REMOTE_ACCESS,
        };
        config_access & bit != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 0);

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(IpAddr::from([192, 168, 4, 23]), NETWORK),
            Access::Local
        );
        assert_eq!(
            classify(IpAddr::from([192, 168, 5, 23]), NETWORK),
            Access::Remote
        );
        assert_eq!(
            classify("::ffff:192.168.4.9".parse().unwrap(), NETWORK),
            Access::Local
        );
        assert_eq!(classify("::1".parse().unwrap(), NETWORK), Access::Remote);
    }

    #[test]
    fn test_allowed_bits() {
        assert!(Access::Local.allowed(LOCAL_ACCESS));
        assert!(!Access::Remote.allowed(LOCAL_ACCESS));
        assert!(Access::Remote.allowed(LOCAL_ACCESS | REMOTE_ACCESS));
        assert!(!Access::Local.allowed(0));
    }
}
