use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// A remote endpoint reported by the relay in `InitHolepunch`.
///
/// The relay only sends the first four groups of an IPv6 address. They are kept
/// as the high half of `ip`, with the low half zeroed, and rendered as four
/// uppercase hex groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    ip: IpAddr,
    port: u16,
    is_v6: bool,
}

impl PeerAddress {
    pub fn v4(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            is_v6: false,
        }
    }

    /// Builds an IPv6 peer from the four groups carried on the wire.
    pub fn v6(groups: [u16; 4], port: u16) -> Self {
        let [a, b, c, d] = groups;
        Self {
            ip: Ipv6Addr::new(a, b, c, d, 0, 0, 0, 0).into(),
            port,
            is_v6: true,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_v6(&self) -> bool {
        self.is_v6
    }

    /// The four wire groups of an IPv6 peer, `None` for IPv4.
    pub fn v6_groups(&self) -> Option<[u16; 4]> {
        match self.ip {
            IpAddr::V6(ip) => {
                let s = ip.segments();
                Some([s[0], s[1], s[2], s[3]])
            }
            IpAddr::V4(_) => None,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.v6_groups() {
            Some([a, b, c, d]) => write!(f, "[{:X}:{:X}:{:X}:{:X}]:{}", a, b, c, d, self.port),
            None => write!(f, "{}:{}", self.ip, self.port),
        }
    }
}
