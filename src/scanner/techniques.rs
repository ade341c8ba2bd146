//! Port probing techniques

use crate::network::packet::{SynPacketBuilder, TcpResponse};
use crate::network::socket::{local_ip_for, random_source_port, RawSocket};
use crate::network::{ProbeResult, ProbeState};
use crate::ScanError;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// One port check against one address.
///
/// Implementations never fail: local errors are logged and reported as an
/// `unreachable` result carrying a note.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, address: IpAddr, port: u16) -> ProbeResult;

    /// Get the name of the technique
    fn name(&self) -> &'static str;
}

/// Full handshake probe; needs no privileges
#[derive(Debug, Clone)]
pub struct ConnectProbe {
    timeout: Duration,
}

impl ConnectProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PortProbe for ConnectProbe {
    async fn probe(&self, address: IpAddr, port: u16) -> ProbeResult {
        let addr = SocketAddr::new(address, port);
        let started = Instant::now();

        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => ProbeResult::port(address, port, ProbeState::Open).with_latency(started.elapsed()),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                ProbeResult::port(address, port, ProbeState::Closed).with_latency(started.elapsed())
            }
            Ok(Err(e)) if is_unreachable(&e) => {
                ProbeResult::port(address, port, ProbeState::Unreachable).with_note(e.to_string())
            }
            Ok(Err(e)) => {
                log::warn!("Connect probe to {} failed locally: {}", addr, e);
                ProbeResult::port(address, port, ProbeState::Unreachable).with_note(format!("probe error: {}", e))
            }
            // Without raw-socket visibility a drop and a dead host look the same.
            Err(_) => ProbeResult::port(address, port, ProbeState::Filtered),
        }
    }

    fn name(&self) -> &'static str {
        "connect"
    }
}

fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EHOSTUNREACH) | Some(libc::ENETUNREACH) | Some(libc::EHOSTDOWN)
    )
}

/// Half-open probe over a raw socket (IPv4 only)
#[derive(Debug, Clone)]
pub struct SynProbe {
    timeout: Duration,
}

impl SynProbe {
    /// Fails with `PermissionError` when raw sockets are not allowed
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        drop(RawSocket::new_tcp()?);
        Ok(Self { timeout })
    }

    fn probe_blocking(target: Ipv4Addr, port: u16, wait: Duration) -> crate::Result<ProbeResult> {
        let address = IpAddr::V4(target);
        let socket = RawSocket::new_tcp()?;
        let source_ip = local_ip_for(target)?;
        let source_port = random_source_port();

        let packet = SynPacketBuilder::new(source_ip, target, source_port, port).build()?;
        let started = Instant::now();
        socket.send_to(&packet, target)?;

        // The raw socket sees every inbound TCP segment; keep only the reply to ours.
        let mut buf = [0u8; 1500];
        while started.elapsed() < wait {
            socket.set_read_timeout(wait.saturating_sub(started.elapsed()))?;
            let size = match socket.recv(&mut buf)? {
                Some(size) => size,
                None => continue,
            };

            let response = match TcpResponse::parse(&buf[..size]) {
                Some(response) if response.answers(target, port, source_port) => response,
                _ => continue,
            };

            let state = if response.is_syn_ack() {
                ProbeState::Open
            } else if response.is_rst() {
                ProbeState::Closed
            } else {
                continue;
            };

            return Ok(ProbeResult::port(address, port, state)
                .with_latency(started.elapsed())
                .with_signal(response.signal()));
        }

        Ok(ProbeResult::port(address, port, ProbeState::Filtered))
    }
}

#[async_trait]
impl PortProbe for SynProbe {
    async fn probe(&self, address: IpAddr, port: u16) -> ProbeResult {
        let target = match address {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => {
                return ProbeResult::port(address, port, ProbeState::Unreachable)
                    .with_note("half-open probing supports IPv4 only");
            }
        };

        let wait = self.timeout;
        let outcome = tokio::task::spawn_blocking(move || Self::probe_blocking(target, port, wait))
            .await
            .map_err(|e| ScanError::ProbeExecution(e.to_string()))
            .and_then(|inner| inner);

        match outcome {
            Ok(result) => result,
            Err(e) => {
                log::warn!("SYN probe to {}:{} failed locally: {}", address, port, e);
                ProbeResult::port(address, port, ProbeState::Unreachable).with_note(format!("probe error: {}", e))
            }
        }
    }

    fn name(&self) -> &'static str {
        "syn"
    }
}
