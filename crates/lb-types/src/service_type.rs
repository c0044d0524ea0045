//! Service type tags.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of load-balanced service a frontend belongs to.
///
/// The service manager records this tag; it does not interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceType {
    /// Cluster-internal virtual IP.
    #[default]
    ClusterIP,
    /// Port exposed on every node address.
    NodePort,
    /// Externally assigned IP.
    ExternalIPs,
    /// Cloud or bare-metal load balancer IP.
    LoadBalancer,
    /// Container host port mapping.
    HostPort,
    /// Redirect to a node-local backend.
    LocalRedirect,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::ExternalIPs => "ExternalIPs",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::HostPort => "HostPort",
            ServiceType::LocalRedirect => "LocalRedirect",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ServiceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clusterip" => Ok(ServiceType::ClusterIP),
            "nodeport" => Ok(ServiceType::NodePort),
            "externalips" => Ok(ServiceType::ExternalIPs),
            "loadbalancer" => Ok(ServiceType::LoadBalancer),
            "hostport" => Ok(ServiceType::HostPort),
            "localredirect" => Ok(ServiceType::LocalRedirect),
            _ => Err(ParseError::InvalidServiceType(s.to_string())),
        }
    }
}
