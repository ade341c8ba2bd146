//! Target resolution for IP literals, CIDR blocks and hostnames
//!
//! Every operation starts here: a target that does not validate or resolve
//! aborts with `TargetInvalid` before any probe job exists.
//! - IPv4 and IPv6 literals pass through unchanged
//! - CIDR blocks expand to usable hosts, capped at a ceiling
//! - Hostnames are checked against a conservative pattern, then resolved

use crate::config::EngineConfig;
use crate::error::{Notice, ScanError};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

static HOSTNAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("hostname pattern is valid")
});

/// Type of target that was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetType {
    SingleIpv4,
    SingleIpv6,
    Ipv4Cidr,
    Ipv6Cidr,
    Hostname,
}

/// Outcome of resolving one target expression
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub original: String,
    pub target_type: TargetType,
    /// Sorted, de-duplicated, never longer than the resolver ceiling
    pub addresses: Vec<IpAddr>,
    pub notices: Vec<Notice>,
}

impl Resolution {
    fn single(original: &str, target_type: TargetType, addr: IpAddr) -> Self {
        Self {
            original: original.to_string(),
            target_type,
            addresses: vec![addr],
            notices: Vec::new(),
        }
    }

    /// First resolved address, for single-target operations
    pub fn primary(&self) -> crate::Result<IpAddr> {
        self.addresses
            .first()
            .copied()
            .ok_or_else(|| ScanError::TargetInvalid(format!("{} resolved to no addresses", self.original)))
    }
}

/// Target resolver with a CIDR expansion ceiling
#[derive(Debug, Clone)]
pub struct TargetResolver {
    max_hosts: usize,
    lookup_timeout: Duration,
}

impl Default for TargetResolver {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(5))
    }
}

impl TargetResolver {
    pub fn new(max_hosts: usize, lookup_timeout: Duration) -> Self {
        Self { max_hosts: max_hosts.max(1), lookup_timeout }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_cidr_hosts, config.external_timeout_duration().min(Duration::from_secs(5)))
    }

    /// Resolve a target expression into concrete addresses
    pub async fn resolve(&self, input: &str) -> crate::Result<Resolution> {
        if let Some(resolution) = self.parse_literal(input)? {
            return Ok(resolution);
        }

        let host = input.trim();
        if !is_valid_hostname(host) {
            return Err(ScanError::TargetInvalid(format!("'{}' is not a valid hostname", host)));
        }

        let lookup = tokio::time::timeout(self.lookup_timeout, tokio::net::lookup_host((host, 0)))
            .await
            .map_err(|_| ScanError::TargetInvalid(format!("resolving {} timed out", host)))?
            .map_err(|e| ScanError::TargetInvalid(format!("cannot resolve {}: {}", host, e)))?;

        let addresses: BTreeSet<IpAddr> = lookup.map(|sa| sa.ip()).collect();
        if addresses.is_empty() {
            return Err(ScanError::TargetInvalid(format!("{} has no addresses", host)));
        }

        log::debug!("Resolved {} to {} address(es)", host, addresses.len());

        Ok(Resolution {
            original: host.to_string(),
            target_type: TargetType::Hostname,
            addresses: addresses.into_iter().collect(),
            notices: Vec::new(),
        })
    }

    /// Handle IP and CIDR literals without touching the network.
    ///
    /// Returns `Ok(None)` when the input is neither, so the caller can try
    /// hostname resolution.
    pub fn parse_literal(&self, input: &str) -> crate::Result<Option<Resolution>> {
        let target = input.trim();
        if target.is_empty() {
            return Err(ScanError::TargetInvalid("target cannot be empty".to_string()));
        }

        if target.contains('/') {
            let network = IpNetwork::from_str(target)
                .map_err(|e| ScanError::TargetInvalid(format!("invalid CIDR '{}': {}", target, e)))?;
            return Ok(Some(self.expand(target, network)));
        }

        match IpAddr::from_str(target) {
            Ok(addr @ IpAddr::V4(_)) => Ok(Some(Resolution::single(target, TargetType::SingleIpv4, addr))),
            Ok(addr @ IpAddr::V6(_)) => Ok(Some(Resolution::single(target, TargetType::SingleIpv6, addr))),
            Err(_) => Ok(None),
        }
    }

    fn expand(&self, original: &str, network: IpNetwork) -> Resolution {
        let (target_type, usable, addresses) = match network {
            IpNetwork::V4(net) => {
                let (usable, hosts) = self.expand_v4(net);
                (TargetType::Ipv4Cidr, usable, hosts)
            }
            IpNetwork::V6(net) => {
                let (usable, hosts) = self.expand_v6(net);
                (TargetType::Ipv6Cidr, usable, hosts)
            }
        };

        let mut notices = Vec::new();
        if usable > addresses.len() as u128 {
            let notice = Notice::TruncatedWarning {
                requested: u64::try_from(usable).unwrap_or(u64::MAX),
                kept: addresses.len(),
            };
            log::warn!("{}: {}", original, notice);
            notices.push(notice);
        }

        Resolution {
            original: original.to_string(),
            target_type,
            addresses,
            notices,
        }
    }

    // Network and broadcast addresses are dropped unless the block is /31 or /32.
    // `Ipv4Network::size` and `iter` overflow on a /0, so the range is walked directly.
    fn expand_v4(&self, net: Ipv4Network) -> (u128, Vec<IpAddr>) {
        let size = 1u128 << (32 - u32::from(net.prefix()));
        let skip_edges = net.prefix() <= 30;
        let usable = if skip_edges { size - 2 } else { size };

        let network = u32::from(net.network());
        let broadcast = u32::from(net.broadcast());
        let hosts = (network..=broadcast)
            .filter(|ip| !skip_edges || (*ip != network && *ip != broadcast))
            .map(Ipv4Addr::from)
            .take(self.max_hosts)
            .map(IpAddr::V4)
            .collect();

        (usable, hosts)
    }

    // IPv6 has no broadcast; only the subnet-router anycast address is skipped.
    fn expand_v6(&self, net: Ipv6Network) -> (u128, Vec<IpAddr>) {
        let size = 1u128.checked_shl(128 - u32::from(net.prefix())).unwrap_or(u128::MAX);
        let skip_anycast = net.prefix() <= 126;
        let usable = if skip_anycast { size - 1 } else { size };

        let network = net.network();
        let hosts = net
            .iter()
            .filter(|ip| !skip_anycast || *ip != network)
            .take(self.max_hosts)
            .map(IpAddr::V6)
            .collect();

        (usable, hosts)
    }
}

/// Conservative RFC 1123 hostname check
pub fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty() && hostname.len() <= 253 && HOSTNAME_PATTERN.is_match(hostname)
}
