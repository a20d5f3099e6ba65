//! Network boundary: isolated address space with public and private tiers
//!
//! A network carves its CIDR block into one public and (when NAT egress
//! is provisioned) one private subnet per availability zone. Subnet
//! ranges never overlap; the constructor verifies this before the
//! network is handed out.

use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Reachability tier of a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetTier {
    /// Internet-reachable through the network's public entry points.
    Public,
    /// Egress only, routed through a NAT gateway.
    Private,
}

impl SubnetTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetTier::Public => "public",
            SubnetTier::Private => "private",
        }
    }
}

/// One carved address range within a network.
#[derive(Debug, Clone)]
pub struct Subnet {
    pub name: String,
    pub tier: SubnetTier,
    pub az: String,
    pub cidr: Ipv4Network,
}

/// An isolated network spanning one or more availability zones.
#[derive(Debug)]
pub struct Network {
    name: String,
    cidr: Ipv4Network,
    az_count: u32,
    nat_gateway_count: u32,
    subnets: Vec<Subnet>,
    created_at: DateTime<Utc>,
    ip_cursor: AtomicU32,
    public_ip_cursor: AtomicU32,
}

impl Network {
    /// Allocate a network across `az_count` availability zones.
    ///
    /// A private tier exists only when at least one NAT gateway is
    /// requested, so the "private subnets imply NAT egress" invariant
    /// holds by construction.
    pub fn create(
        name: impl Into<String>,
        cidr: Ipv4Network,
        az_count: u32,
        nat_gateway_count: u32,
    ) -> Result<Self> {
        if az_count < 1 {
            return Err(ProvisionError::config("az_count must be at least 1"));
        }
        if nat_gateway_count > az_count {
            return Err(ProvisionError::config(format!(
                "nat_gateway_count ({}) cannot exceed az_count ({})",
                nat_gateway_count, az_count
            )));
        }

        let tiers: &[SubnetTier] = if nat_gateway_count > 0 {
            &[SubnetTier::Public, SubnetTier::Private]
        } else {
            &[SubnetTier::Public]
        };

        let subnets = carve_subnets(cidr, az_count, tiers)?;
        ensure_disjoint(&subnets)?;

        Ok(Self {
            name: name.into(),
            cidr,
            az_count,
            nat_gateway_count,
            subnets,
            created_at: Utc::now(),
            ip_cursor: AtomicU32::new(0),
            public_ip_cursor: AtomicU32::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cidr(&self) -> Ipv4Network {
        self.cidr
    }

    pub fn az_count(&self) -> u32 {
        self.az_count
    }

    pub fn nat_gateway_count(&self) -> u32 {
        self.nat_gateway_count
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    pub fn public_subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.subnets
            .iter()
            .filter(|s| s.tier == SubnetTier::Public)
    }

    pub fn private_subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.subnets
            .iter()
            .filter(|s| s.tier == SubnetTier::Private)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Hand out an address from the private tier (public tier when no
    /// private subnets exist), round-robin across availability zones.
    pub(crate) fn allocate_private_ip(&self) -> Ipv4Addr {
        let pool: Vec<&Subnet> = if self.nat_gateway_count > 0 {
            self.private_subnets().collect()
        } else {
            self.public_subnets().collect()
        };
        let n = self.ip_cursor.fetch_add(1, Ordering::Relaxed);
        let subnet = pool[n as usize % pool.len()];
        let capacity = 1u32 << (32 - subnet.cidr.prefix());
        // skip the network address and the first reserved hosts, and
        // stay clear of the broadcast address
        let host = 4 + (n / pool.len() as u32) % (capacity - 5);
        Ipv4Addr::from(u32::from(subnet.cidr.network()) + host)
    }

    /// Hand out a publicly routable address (RFC 5737 documentation
    /// range, since this model never touches real internet space).
    pub(crate) fn allocate_public_ip(&self) -> Ipv4Addr {
        let n = self.public_ip_cursor.fetch_add(1, Ordering::Relaxed);
        Ipv4Addr::new(203, 0, 113, (1 + n % 254) as u8)
    }
}

/// Label for the i-th availability zone: `az-a`, `az-b`, ...
fn az_label(index: u32) -> String {
    format!("az-{}", (b'a' + (index % 26) as u8) as char)
}

/// Carve `az_count * tiers` equally sized, consecutive blocks out of
/// the parent CIDR.
fn carve_subnets(cidr: Ipv4Network, az_count: u32, tiers: &[SubnetTier]) -> Result<Vec<Subnet>> {
    let total = az_count * tiers.len() as u32;
    let bits = 32 - (total - 1).leading_zeros();
    let prefix = cidr.prefix() as u32 + bits;
    if prefix > 28 {
        return Err(ProvisionError::config(format!(
            "CIDR /{} is too small to carve {} subnets",
            cidr.prefix(),
            total
        )));
    }

    let base = u32::from(cidr.network());
    let step = 1u32 << (32 - prefix);
    let mut subnets = Vec::with_capacity(total as usize);
    let mut index = 0u32;
    for tier in tiers {
        for az in 0..az_count {
            let addr = Ipv4Addr::from(base + index * step);
            let block = Ipv4Network::new(addr, prefix as u8)
                .map_err(|e| ProvisionError::config(format!("subnet carve failed: {}", e)))?;
            subnets.push(Subnet {
                name: format!("{}-{}", tier.as_str(), az_label(az)),
                tier: *tier,
                az: az_label(az),
                cidr: block,
            });
            index += 1;
        }
    }
    Ok(subnets)
}

/// Two CIDR blocks overlap when either contains the other's network
/// address.
fn networks_overlap(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

fn ensure_disjoint(subnets: &[Subnet]) -> Result<()> {
    for (i, a) in subnets.iter().enumerate() {
        for b in &subnets[i + 1..] {
            if networks_overlap(a.cidr, b.cidr) {
                return Err(ProvisionError::config(format!(
                    "subnet ranges {} and {} overlap",
                    a.cidr, b.cidr
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_create_rejects_zero_azs() {
        let err = Network::create("vpc", cidr("10.0.0.0/16"), 0, 0).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_create_rejects_more_nats_than_azs() {
        let err = Network::create("vpc", cidr("10.0.0.0/16"), 2, 3).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_two_az_network_has_four_disjoint_subnets() {
        let network = Network::create("vpc", cidr("10.0.0.0/16"), 2, 1).unwrap();
        assert_eq!(network.subnets().len(), 4);
        assert_eq!(network.public_subnets().count(), 2);
        assert_eq!(network.private_subnets().count(), 2);

        let subnets = network.subnets();
        for (i, a) in subnets.iter().enumerate() {
            for b in &subnets[i + 1..] {
                assert!(
                    !networks_overlap(a.cidr, b.cidr),
                    "{} overlaps {}",
                    a.cidr,
                    b.cidr
                );
            }
        }
    }

    #[test]
    fn test_no_nat_means_no_private_tier() {
        let network = Network::create("vpc", cidr("10.0.0.0/16"), 2, 0).unwrap();
        assert_eq!(network.private_subnets().count(), 0);
        assert_eq!(network.public_subnets().count(), 2);
    }

    #[test]
    fn test_cidr_too_small_for_subnet_count() {
        let err = Network::create("vpc", cidr("10.0.0.0/28"), 2, 1).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_subnets_stay_within_parent_cidr() {
        let network = Network::create("vpc", cidr("10.0.0.0/16"), 3, 2).unwrap();
        let parent = network.cidr();
        for subnet in network.subnets() {
            assert!(parent.contains(subnet.cidr.network()));
        }
    }

    #[test]
    fn test_private_ip_allocation_is_unique_and_in_range() {
        let network = Network::create("vpc", cidr("10.0.0.0/16"), 2, 1).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            let ip = network.allocate_private_ip();
            assert!(seen.insert(ip), "duplicate ip {}", ip);
            assert!(
                network.private_subnets().any(|s| s.cidr.contains(ip)),
                "{} outside private tier",
                ip
            );
        }
    }

    #[test]
    fn test_overlap_detection() {
        assert!(networks_overlap(cidr("10.0.0.0/16"), cidr("10.0.128.0/17")));
        assert!(!networks_overlap(cidr("10.0.0.0/17"), cidr("10.0.128.0/17")));
    }
}
