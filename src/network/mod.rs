//! Network module: probe result model, raw sockets, reachability probes
//! and local interface/DNS lookups

pub mod dns;
pub mod icmp;
pub mod interfaces;
pub mod packet;
pub mod socket;

use crate::intelligence::service_detection::ServiceGuess;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;

/// Outcome of a single reachability or port check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Open,
    Closed,
    Filtered,
    Unreachable,
    Timeout,
}

impl ProbeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeState::Open => "open",
            ProbeState::Closed => "closed",
            ProbeState::Filtered => "filtered",
            ProbeState::Unreachable => "unreachable",
            ProbeState::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw TCP/IP signal observed in a reply, used for OS classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TcpSignal {
    pub ttl: u8,
    pub window: u16,
}

/// Result of one probe. Emitted once per (address, port) and never mutated
/// after it leaves the prober.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub address: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub state: ProbeState,
    #[serde(serialize_with = "serialize_latency_ms")]
    pub latency: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceGuess>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<TcpSignal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ProbeResult {
    pub fn new(address: IpAddr, port: Option<u16>, state: ProbeState) -> Self {
        Self {
            address,
            port,
            state,
            latency: None,
            service: None,
            signal: None,
            note: None,
        }
    }

    /// Host-level result without a port
    pub fn host(address: IpAddr, state: ProbeState) -> Self {
        Self::new(address, None, state)
    }

    pub fn port(address: IpAddr, port: u16, state: ProbeState) -> Self {
        Self::new(address, Some(port), state)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_service(mut self, service: ServiceGuess) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_signal(mut self, signal: TcpSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == ProbeState::Open
    }

    /// Sort key for callers that need a deterministic order
    pub fn sort_key(&self) -> (IpAddr, u16) {
        (self.address, self.port.unwrap_or(0))
    }
}

pub(crate) fn serialize_latency_ms<S: serde::Serializer>(latency: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match latency {
        Some(d) => serializer.serialize_some(&(d.as_secs_f64() * 1000.0)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_probe_result_builders() {
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let result = ProbeResult::port(addr, 22, ProbeState::Open)
            .with_latency(Duration::from_millis(3))
            .with_note("syn-ack");

        assert!(result.is_open());
        assert_eq!(result.sort_key(), (addr, 22));
        assert_eq!(result.note.as_deref(), Some("syn-ack"));
    }

    #[test]
    fn test_json_shape() {
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let result = ProbeResult::host(addr, ProbeState::Timeout);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["address"], "10.0.0.1");
        assert_eq!(json["state"], "timeout");
        assert!(json["latency"].is_null());
        assert!(json.get("port").is_none());
    }
}
