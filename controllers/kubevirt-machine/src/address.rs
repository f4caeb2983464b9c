//! Best-effort node address resolution.
//!
//! A machine's addresses are its instance name (as an internal DNS name)
//! plus whatever IPv4 addresses that name resolves to. Resolution is
//! advisory: it is bounded by a timeout and a failure only means the DNS
//! entry is published alone.

use async_trait::async_trait;
use crds::{MachineAddress, NodeAddressType};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::debug;

/// Outcome of resolving an instance hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Vec<Ipv4Addr>),
    Unresolved,
}

/// Hostname to IPv4 lookup
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Resolution;
}

/// System resolver with a deadline
#[derive(Debug, Clone)]
pub struct DnsResolver {
    timeout: Duration,
}

impl DnsResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AddressResolver for DnsResolver {
    async fn resolve(&self, hostname: &str) -> Resolution {
        if hostname.is_empty() {
            return Resolution::Unresolved;
        }
        match tokio::time::timeout(self.timeout, tokio::net::lookup_host((hostname, 0))).await {
            Ok(Ok(addrs)) => {
                let mut ips: Vec<Ipv4Addr> = Vec::new();
                for addr in addrs {
                    if let IpAddr::V4(ip) = addr.ip() {
                        if !ips.contains(&ip) {
                            ips.push(ip);
                        }
                    }
                }
                Resolution::Resolved(ips)
            }
            Ok(Err(e)) => {
                debug!("Failed to resolve {}: {}", hostname, e);
                Resolution::Unresolved
            }
            Err(_) => {
                debug!("Resolving {} timed out after {:?}", hostname, self.timeout);
                Resolution::Unresolved
            }
        }
    }
}

/// Addresses published for an instance: the DNS name first, then every
/// resolved IPv4 address.
pub fn node_addresses(hostname: &str, resolution: &Resolution) -> Vec<MachineAddress> {
    let mut addresses = vec![MachineAddress::new(NodeAddressType::InternalDNS, hostname)];
    if let Resolution::Resolved(ips) = resolution {
        addresses.extend(
            ips.iter()
                .map(|ip| MachineAddress::new(NodeAddressType::InternalIP, ip.to_string())),
        );
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_keeps_dns_entry_only() {
        let addresses = node_addresses("worker-0", &Resolution::Unresolved);
        assert_eq!(addresses, vec![MachineAddress::new(NodeAddressType::InternalDNS, "worker-0")]);
    }

    #[test]
    fn test_resolved_addresses_follow_dns_entry() {
        let resolution = Resolution::Resolved(vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)]);
        let addresses = node_addresses("worker-0", &resolution);
        assert_eq!(
            addresses,
            vec![
                MachineAddress::new(NodeAddressType::InternalDNS, "worker-0"),
                MachineAddress::new(NodeAddressType::InternalIP, "10.0.0.5"),
                MachineAddress::new(NodeAddressType::InternalIP, "10.0.0.6"),
            ]
        );
    }

    #[tokio::test]
    async fn test_dns_resolver_ip_literal() {
        let resolver = DnsResolver::new(Duration::from_secs(2));
        assert_eq!(
            resolver.resolve("127.0.0.1").await,
            Resolution::Resolved(vec![Ipv4Addr::LOCALHOST])
        );
    }

    #[tokio::test]
    async fn test_dns_resolver_empty_hostname() {
        let resolver = DnsResolver::new(Duration::from_millis(10));
        assert_eq!(resolver.resolve("").await, Resolution::Unresolved);
    }
}
