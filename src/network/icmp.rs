//! Reachability probes: native ICMP echo and the system `ping` command

use crate::network::socket::RawSocket;
use crate::ScanError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tokio::process::Command;

static RTT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("rtt pattern is valid"));
static TTL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ttl[=:]\s*([0-9]+)").expect("ttl pattern is valid"));

const ECHO_PAYLOAD_LEN: usize = 32;

/// A successful echo
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PingReply {
    pub rtt: Duration,
    pub ttl: Option<u8>,
}

/// Single reachability probe.
///
/// `Ok(None)` means no answer within `timeout`; `Err` is a local failure
/// such as a missing binary or socket exhaustion.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, target: IpAddr, timeout: Duration) -> crate::Result<Option<PingReply>>;

    fn name(&self) -> &'static str;
}

/// Native ICMP echo over a raw socket (IPv4 only)
pub struct IcmpPinger {
    identifier: u16,
    sequence: AtomicU16,
}

impl IcmpPinger {
    /// Fails with `PermissionError` when raw sockets are not allowed
    pub fn new() -> crate::Result<Self> {
        drop(RawSocket::new_icmp()?);
        Ok(Self {
            identifier: rand::thread_rng().gen(),
            sequence: AtomicU16::new(0),
        })
    }

    fn echo_blocking(target: Ipv4Addr, identifier: u16, sequence: u16, timeout: Duration) -> crate::Result<Option<PingReply>> {
        let socket = RawSocket::new_icmp()?;
        socket.set_read_timeout(timeout)?;

        let request = build_echo_request(identifier, sequence)?;
        let started = Instant::now();
        socket.send_to(&request, target)?;

        let mut buf = [0u8; 1500];
        while started.elapsed() < timeout {
            socket.set_read_timeout(timeout.saturating_sub(started.elapsed()))?;
            let size = match socket.recv(&mut buf)? {
                Some(size) => size,
                None => continue,
            };

            if let Some(ttl) = match_echo_reply(&buf[..size], target, identifier, sequence) {
                return Ok(Some(PingReply {
                    rtt: started.elapsed(),
                    ttl: Some(ttl),
                }));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn ping(&self, target: IpAddr, timeout: Duration) -> crate::Result<Option<PingReply>> {
        let target = match target {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => {
                return Err(ScanError::ProbeExecution("native ICMP echo supports IPv4 only".to_string()));
            }
        };

        let identifier = self.identifier;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        tokio::task::spawn_blocking(move || Self::echo_blocking(target, identifier, sequence, timeout))
            .await
            .map_err(|e| ScanError::ProbeExecution(format!("echo task failed: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "icmp"
    }
}

fn build_echo_request(identifier: u16, sequence: u16) -> crate::Result<Vec<u8>> {
    let mut buffer = vec![0u8; 8 + ECHO_PAYLOAD_LEN];
    {
        let mut echo = MutableEchoRequestPacket::new(&mut buffer)
            .ok_or_else(|| ScanError::ProbeExecution("echo buffer too small".to_string()))?;
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCode(0));
        echo.set_identifier(identifier);
        echo.set_sequence_number(sequence);
        echo.set_payload(&[0x5a; ECHO_PAYLOAD_LEN]);
    }

    let checksum = IcmpPacket::new(&buffer)
        .map(|packet| pnet::packet::icmp::checksum(&packet))
        .ok_or_else(|| ScanError::ProbeExecution("echo buffer too small".to_string()))?;
    buffer[2..4].copy_from_slice(&checksum.to_be_bytes());
    Ok(buffer)
}

/// Returns the reply TTL if `datagram` is our echo reply from `target`
fn match_echo_reply(datagram: &[u8], target: Ipv4Addr, identifier: u16, sequence: u16) -> Option<u8> {
    let ip = Ipv4Packet::new(datagram)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp || ip.get_source() != target {
        return None;
    }

    let reply = EchoReplyPacket::new(ip.payload())?;
    let ours = reply.get_icmp_type() == IcmpTypes::EchoReply
        && reply.get_identifier() == identifier
        && reply.get_sequence_number() == sequence;

    ours.then(|| ip.get_ttl())
}

/// Reachability through the system `ping` binary
pub struct CommandPinger {
    program: String,
}

impl CommandPinger {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait]
impl Pinger for CommandPinger {
    async fn ping(&self, target: IpAddr, timeout: Duration) -> crate::Result<Option<PingReply>> {
        let (program, args) = ping_command(&self.program, target, timeout);
        let mut command = Command::new(program);
        command.args(&args).kill_on_drop(true);

        let started = Instant::now();
        let output = match tokio::time::timeout(timeout + Duration::from_millis(500), command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScanError::ToolUnavailable(self.program.clone()));
            }
            Ok(Err(e)) => return Err(ScanError::ProbeExecution(format!("{}: {}", self.program, e))),
            Err(_) => return Ok(None),
        };

        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Some(parse_ping_output(&stdout).unwrap_or(PingReply {
            rtt: started.elapsed(),
            ttl: None,
        })))
    }

    fn name(&self) -> &'static str {
        "ping-command"
    }
}

/// Program and arguments for a single echo with a reply deadline.
///
/// Linux `ping -W` takes whole seconds and selects IPv6 with `-6`.
#[cfg(not(target_os = "macos"))]
fn ping_command(program: &str, target: IpAddr, timeout: Duration) -> (String, Vec<String>) {
    let wait_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;

    let mut args = Vec::new();
    if target.is_ipv6() {
        args.push("-6".to_string());
    }
    args.extend(["-c".to_string(), "1".to_string(), "-W".to_string(), wait_secs.to_string()]);
    args.push(target.to_string());
    (program.to_string(), args)
}

/// Program and arguments for a single echo with a reply deadline.
///
/// macOS `ping -W` takes milliseconds. IPv6 goes through `ping6`, which has
/// no wait flag, so the caller's timeout bounds it.
#[cfg(target_os = "macos")]
fn ping_command(program: &str, target: IpAddr, timeout: Duration) -> (String, Vec<String>) {
    let count = ["-c".to_string(), "1".to_string()];
    if target.is_ipv6() {
        let mut args = count.to_vec();
        args.push(target.to_string());
        return (format!("{}6", program), args);
    }

    let wait_ms = timeout.as_millis().max(1);
    let mut args = count.to_vec();
    args.extend(["-W".to_string(), wait_ms.to_string(), target.to_string()]);
    (program.to_string(), args)
}

/// Extract RTT and TTL from one reply line of `ping` output
pub fn parse_ping_output(stdout: &str) -> Option<PingReply> {
    let rtt_ms: f64 = RTT_PATTERN.captures(stdout)?.get(1)?.as_str().parse().ok()?;
    let ttl = TTL_PATTERN
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());

    Some(PingReply {
        rtt: Duration::from_secs_f64(rtt_ms / 1000.0),
        ttl,
    })
}

/// Native ICMP for IPv4 when privileged, the system command otherwise
pub struct SystemPinger {
    native: Option<IcmpPinger>,
    command: CommandPinger,
}

impl SystemPinger {
    pub fn new(ping_path: &str) -> Self {
        let native = match IcmpPinger::new() {
            Ok(pinger) => Some(pinger),
            Err(e) => {
                log::debug!("Native ICMP unavailable ({}), using {}", e, ping_path);
                None
            }
        };

        Self {
            native,
            command: CommandPinger::new(ping_path),
        }
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, target: IpAddr, timeout: Duration) -> crate::Result<Option<PingReply>> {
        match (&self.native, target) {
            (Some(native), IpAddr::V4(_)) => native.ping(target, timeout).await,
            _ => self.command.ping(target, timeout).await,
        }
    }

    fn name(&self) -> &'static str {
        if self.native.is_some() {
            "icmp"
        } else {
            "ping-command"
        }
    }
}
