//! Port prober: strategy selection, pool-driven probing and the scan report

pub mod engine;
pub mod techniques;

use crate::error::Notice;
use crate::network::{ProbeResult, ProbeState};
use crate::ScanError;
use serde::Serialize;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

pub use engine::PortScanner;
pub use techniques::{ConnectProbe, PortProbe, SynProbe};

/// Closed set of port-probing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStrategy {
    /// Best available built-in strategy
    Auto,
    /// Full transport handshake
    Connect,
    /// Half-open probe over a raw socket
    Syn,
    /// Delegate to an external scanner
    External,
}

impl ProbeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeStrategy::Auto => "auto",
            ProbeStrategy::Connect => "connect",
            ProbeStrategy::Syn => "syn",
            ProbeStrategy::External => "external",
        }
    }

    /// Check if the strategy requires raw sockets
    pub fn requires_raw_socket(&self) -> bool {
        matches!(self, ProbeStrategy::Syn)
    }
}

impl std::fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProbeStrategy {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ProbeStrategy::Auto),
            "connect" | "tcp" => Ok(ProbeStrategy::Connect),
            "syn" => Ok(ProbeStrategy::Syn),
            "external" | "nmap" => Ok(ProbeStrategy::External),
            other => Err(ScanError::ConfigError(format!("unknown probe strategy '{}'", other))),
        }
    }
}

/// Complete result of probing one address
#[derive(Debug, Clone, Serialize)]
pub struct PortScanReport {
    pub address: IpAddr,
    pub strategy_requested: ProbeStrategy,
    pub strategy_used: ProbeStrategy,
    /// Sorted by port
    pub results: Vec<ProbeResult>,
    pub notices: Vec<Notice>,
    pub submitted: usize,
    /// Ports never probed because the scan was cancelled
    pub not_started: usize,
    pub cancelled: bool,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl PortScanReport {
    pub fn open(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter().filter(|r| r.is_open())
    }

    pub fn count(&self, state: ProbeState) -> usize {
        self.results.iter().filter(|r| r.state == state).count()
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("AUTO".parse::<ProbeStrategy>().unwrap(), ProbeStrategy::Auto);
        assert_eq!("syn".parse::<ProbeStrategy>().unwrap(), ProbeStrategy::Syn);
        assert_eq!("nmap".parse::<ProbeStrategy>().unwrap(), ProbeStrategy::External);
        assert!("xmas".parse::<ProbeStrategy>().is_err());
        assert!(ProbeStrategy::Syn.requires_raw_socket());
        assert!(!ProbeStrategy::Connect.requires_raw_socket());
    }
}
