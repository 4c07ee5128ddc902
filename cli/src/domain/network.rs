//! Subnet arithmetic and deterministic static private IP assignment.

use std::net::Ipv4Addr;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),
    #[error("subnet {cidr} has no usable hosts after skipping {reserved}")]
    SubnetTooSmall { cidr: String, reserved: u32 },
}

/// An IPv4 network in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl FromStr for Subnet {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetworkError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        };
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl Subnet {
    /// Number of assignable hosts. Network and broadcast addresses are
    /// excluded except on /31 and /32.
    #[must_use]
    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (32 - u32::from(self.prefix));
        match self.prefix {
            31 | 32 => size,
            _ => size - 2,
        }
    }

    /// The `index`-th assignable host, if any.
    #[must_use]
    pub fn host(&self, index: u64) -> Option<Ipv4Addr> {
        if index >= self.host_count() {
            return None;
        }
        let first = match self.prefix {
            31 | 32 => u64::from(u32::from(self.network)),
            _ => u64::from(u32::from(self.network)) + 1,
        };
        u32::try_from(first + index).ok().map(Ipv4Addr::from)
    }
}

/// How a VM's static address was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticIp {
    /// Derived from the subnet.
    Derived(Ipv4Addr),
    /// The subnet could not be used; `reason` says why.
    Fallback { ip: Ipv4Addr, reason: String },
}

impl StaticIp {
    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        match self {
            Self::Derived(ip) | Self::Fallback { ip, .. } => *ip,
        }
    }
}

/// Derive the static IP for `vm_name` inside `cidr`, skipping the first
/// `reserved` hosts.
///
/// The SHA-256 of the name, read as a big-endian integer, is reduced modulo
/// the remaining host count and used as an index into those hosts.
pub fn static_ip(vm_name: &str, cidr: &str, reserved: u32) -> Result<Ipv4Addr, NetworkError> {
    let subnet: Subnet = cidr.parse()?;
    let usable = subnet.host_count().saturating_sub(u64::from(reserved));
    if usable == 0 {
        return Err(NetworkError::SubnetTooSmall {
            cidr: cidr.to_string(),
            reserved,
        });
    }
    let offset = digest_mod(vm_name, usable);
    subnet
        .host(u64::from(reserved) + offset)
        .ok_or_else(|| NetworkError::InvalidCidr(cidr.to_string()))
}

/// Address used when the subnet cannot be parsed or is exhausted.
#[must_use]
pub fn fallback_ip(vm_name: &str) -> Ipv4Addr {
    // < 200, so the cast cannot truncate
    #[allow(clippy::cast_possible_truncation)]
    let octet = 50 + digest_mod(vm_name, 200) as u8;
    Ipv4Addr::new(10, 0, 0, octet)
}

/// [`static_ip`] with the degraded fallback applied.
#[must_use]
pub fn assign_static_ip(vm_name: &str, cidr: &str, reserved: u32) -> StaticIp {
    match static_ip(vm_name, cidr, reserved) {
        Ok(ip) => StaticIp::Derived(ip),
        Err(e) => StaticIp::Fallback {
            ip: fallback_ip(vm_name),
            reason: e.to_string(),
        },
    }
}

fn digest_mod(name: &str, modulus: u64) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let m = u128::from(modulus);
    let acc = digest
        .iter()
        .fold(0u128, |acc, b| (acc * 256 + u128::from(*b)) % m);
    // acc < modulus <= u64::MAX
    #[allow(clippy::cast_possible_truncation)]
    let acc = acc as u64;
    acc
}
