//! Layer 4 protocol and L3+L4 address types.

use crate::{IpAddress, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Layer 4 protocol of a frontend or backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum L4Protocol {
    /// Matches any protocol.
    #[default]
    Any,
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for L4Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            L4Protocol::Any => "ANY",
            L4Protocol::Tcp => "TCP",
            L4Protocol::Udp => "UDP",
            L4Protocol::Sctp => "SCTP",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for L4Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ANY" | "NONE" => Ok(L4Protocol::Any),
            "TCP" => Ok(L4Protocol::Tcp),
            "UDP" => Ok(L4Protocol::Udp),
            "SCTP" => Ok(L4Protocol::Sctp),
            _ => Err(ParseError::InvalidProtocol(s.to_string())),
        }
    }
}

/// An L3+L4 address: protocol, IP address and port.
///
/// Used both for service frontends and for backend endpoints. Two
/// addresses are the same endpoint iff all three fields are equal.
///
/// The text form is `IP:PORT/PROTO`, with IPv6 addresses in brackets:
///
/// ```
/// use lb_types::{L3n4Addr, L4Protocol};
///
/// let addr: L3n4Addr = "10.0.0.1:8080/TCP".parse().unwrap();
/// assert_eq!(addr.protocol, L4Protocol::Tcp);
/// assert_eq!(addr.port, 8080);
///
/// let v6: L3n4Addr = "[2001:db8::1]:53/UDP".parse().unwrap();
/// assert_eq!(v6.to_string(), "[2001:db8::1]:53/UDP");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct L3n4Addr {
    pub protocol: L4Protocol,
    pub ip: IpAddress,
    pub port: u16,
}

impl L3n4Addr {
    pub fn new(protocol: L4Protocol, ip: impl Into<IpAddress>, port: u16) -> Self {
        Self {
            protocol,
            ip: ip.into(),
            port,
        }
    }

    /// Returns true if the IP is unspecified or the port is zero.
    pub fn is_zero(&self) -> bool {
        self.ip.is_unspecified() || self.port == 0
    }
}

impl fmt::Display for L3n4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddress::V4(ip) => write!(f, "{}:{}/{}", ip, self.port, self.protocol),
            IpAddress::V6(ip) => write!(f, "[{}]:{}/{}", ip, self.port, self.protocol),
        }
    }
}

impl FromStr for L3n4Addr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidL3n4Addr(s.to_string());

        let (host_port, protocol) = s.rsplit_once('/').ok_or_else(invalid)?;
        let protocol: L4Protocol = protocol.parse()?;

        let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
        let host = match host.strip_prefix('[') {
            Some(rest) => rest.strip_suffix(']').ok_or_else(invalid)?,
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };

        let ip: IpAddress = host.parse()?;
        let port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(Self { protocol, ip, port })
    }
}

impl TryFrom<String> for L3n4Addr {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<L3n4Addr> for String {
    fn from(addr: L3n4Addr) -> Self {
        addr.to_string()
    }
}
