//! Raw socket management for half-open probing and ICMP echo

use crate::ScanError;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Blocking raw IPv4 socket. Callers run it on `spawn_blocking`.
pub struct RawSocket {
    socket: Socket,
}

impl RawSocket {
    /// Raw TCP socket with the IP header supplied by the caller
    pub fn new_tcp() -> crate::Result<Self> {
        let socket = Self::open(Protocol::TCP, "raw TCP socket")?;
        socket
            .set_header_included(true)
            .map_err(|e| ScanError::from_socket_error(e, "IP_HDRINCL"))?;
        Ok(Self { socket })
    }

    /// Raw ICMP socket; the kernel builds the IP header
    pub fn new_icmp() -> crate::Result<Self> {
        Ok(Self {
            socket: Self::open(Protocol::ICMPV4, "raw ICMP socket")?,
        })
    }

    fn open(protocol: Protocol, what: &str) -> crate::Result<Socket> {
        Socket::new(Domain::IPV4, Type::RAW, Some(protocol)).map_err(|e| ScanError::from_socket_error(e, what))
    }

    /// Send a packet to `dest`
    pub fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> crate::Result<usize> {
        let dest = SocketAddr::new(IpAddr::V4(dest), 0);
        self.socket
            .send_to(packet, &dest.into())
            .map_err(|e| ScanError::NetworkError(format!("raw send to {}: {}", dest.ip(), e)))
    }

    /// Receive one datagram (IP header included).
    ///
    /// Returns `Ok(None)` when the read timeout elapses.
    pub fn recv(&self, buf: &mut [u8]) -> crate::Result<Option<usize>> {
        match (&self.socket).read(buf) {
            Ok(size) => Ok(Some(size)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(ScanError::NetworkError(format!("raw receive: {}", e))),
        }
    }

    pub fn set_read_timeout(&self, timeout: Duration) -> crate::Result<()> {
        // A zero timeout would mean "block forever" to the kernel.
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| ScanError::NetworkError(e.to_string()))
    }
}

/// Local IPv4 address the kernel would route `target` from.
///
/// A connected UDP socket sends nothing but makes the route lookup visible.
pub fn local_ip_for(target: Ipv4Addr) -> crate::Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| ScanError::NetworkError(e.to_string()))?;
    socket
        .connect(SocketAddr::new(IpAddr::V4(target), 9))
        .map_err(|e| ScanError::NetworkError(format!("no route to {}: {}", target, e)))?;

    match socket.local_addr().map_err(|e| ScanError::NetworkError(e.to_string()))?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => Err(ScanError::NetworkError(format!("unexpected IPv6 source {}", ip))),
    }
}

/// Ephemeral source port for crafted probes
pub fn random_source_port() -> u16 {
    rand::thread_rng().gen_range(32768..61000)
}
