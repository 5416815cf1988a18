use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// Transport-layer protocol of a captured packet. `Other` carries whatever
/// textual protocol name the packet source reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proto {
    Tcp,
    Udp,
    Other(String),
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Proto::Tcp => write!(f, "TCP"),
            Proto::Udp => write!(f, "UDP"),
            Proto::Other(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFlags {
    pub ack: bool,
    pub psh: bool,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub urg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpInfo {
    pub payload: Vec<u8>,
    pub seq: u32,
    pub flags: TcpFlags,
}

/// Present iff a TLS record header was recognised on this packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsInfo {
    pub content_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpInfo {
    pub is_request: bool,
}

/// A parsed packet record, immutable once produced by a packet source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Fractional seconds since epoch.
    pub time: f64,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub proto: Proto,
    pub len: u32,
    pub tcp_info: Option<TcpInfo>,
    pub tls_info: Option<TlsInfo>,
    pub http_info: Option<HttpInfo>,
}

impl Packet {
    pub fn is_tcp(&self) -> bool {
        matches!(self.proto, Proto::Tcp)
    }

    pub fn is_udp(&self) -> bool {
        matches!(self.proto, Proto::Udp)
    }

    /// Timestamp in whole microseconds, used by the windowing functions.
    pub fn time_micros(&self) -> i64 {
        (self.time * 1_000_000.0).round() as i64
    }
}

/// A CIDR range with a symmetric overlap predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet(pub IpNetwork);

#[derive(Debug, thiserror::Error)]
#[error("invalid subnet {0:?}")]
pub struct InvalidSubnet(pub String);

impl Subnet {
    pub fn parse(text: &str) -> Result<Self, InvalidSubnet> {
        // Accept either a bare host or CIDR notation; a bare host becomes a
        // single-address network.
        if let Ok(net) = IpNetwork::from_str(text) {
            return Ok(Subnet(net));
        }
        if let Ok(ip) = IpAddr::from_str(text) {
            return Ok(Subnet(IpNetwork::from(ip)));
        }
        Err(InvalidSubnet(text.to_owned()))
    }

    pub fn overlaps_ip(&self, ip: &IpAddr) -> bool {
        self.0.contains(*ip)
    }

    pub fn overlaps_subnet(&self, other: &Subnet) -> bool {
        // Symmetric: true iff either network contains the other's address,
        // which for CIDR ranges is equivalent to checking both directions
        // against the respective network addresses.
        self.0.contains(other.0.ip()) || other.0.contains(self.0.ip())
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_overlap_is_symmetric() {
        let a = Subnet::parse("10.0.0.0/24").unwrap();
        let b = Subnet::parse("10.0.0.5/32").unwrap();
        assert!(a.overlaps_subnet(&b));
        assert!(b.overlaps_subnet(&a));
    }

    #[test]
    fn subnet_overlap_ip() {
        let a = Subnet::parse("10.0.0.0/24").unwrap();
        assert!(a.overlaps_ip(&"10.0.0.5".parse().unwrap()));
        assert!(!a.overlaps_ip(&"10.0.1.5".parse().unwrap()));
    }
}
