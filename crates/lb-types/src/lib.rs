//! Address primitives for the load-balancer control plane.
//!
//! - [`IpAddress`]: IPv4 and IPv6 addresses
//! - [`L4Protocol`]: transport protocol of a frontend or backend
//! - [`L3n4Addr`]: protocol + IP + port, the identity of frontends and backends
//! - [`ServiceType`]: service classification tag

mod ip;
mod l4;
mod service_type;

pub use ip::{IpAddress, Ipv4Address, Ipv6Address};
pub use l4::{L3n4Addr, L4Protocol};
pub use service_type::ServiceType;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid L4 protocol: {0}")]
    InvalidProtocol(String),

    #[error("invalid address (expected IP:PORT/PROTO): {0}")]
    InvalidL3n4Addr(String),

    #[error("invalid service type: {0}")]
    InvalidServiceType(String),
}
