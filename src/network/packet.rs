//! SYN segment crafting and reply parsing

use crate::network::TcpSignal;
use crate::ScanError;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{MutableTcpPacket, TcpFlags, TcpPacket};
use rand::Rng;
use std::net::Ipv4Addr;

const IP_HEADER_LEN: usize = 20;
const TCP_HEADER_LEN: usize = 20;

/// Builder for a single IPv4 + TCP SYN segment
pub struct SynPacketBuilder {
    source_ip: Ipv4Addr,
    dest_ip: Ipv4Addr,
    source_port: u16,
    dest_port: u16,
    seq_num: u32,
    window_size: u16,
    ip_id: u16,
    ttl: u8,
}

impl SynPacketBuilder {
    pub fn new(source_ip: Ipv4Addr, dest_ip: Ipv4Addr, source_port: u16, dest_port: u16) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            source_ip,
            dest_ip,
            source_port,
            dest_port,
            seq_num: rng.gen(),
            window_size: 1024,
            ip_id: rng.gen(),
            ttl: 64,
        }
    }

    pub fn seq_num(mut self, seq_num: u32) -> Self {
        self.seq_num = seq_num;
        self
    }

    pub fn window_size(mut self, window_size: u16) -> Self {
        self.window_size = window_size;
        self
    }

    /// Build the complete IP + TCP packet
    pub fn build(self) -> crate::Result<Vec<u8>> {
        let total_len = IP_HEADER_LEN + TCP_HEADER_LEN;
        let mut packet_buf = vec![0u8; total_len];

        {
            let mut ip_packet = MutableIpv4Packet::new(&mut packet_buf[..IP_HEADER_LEN])
                .ok_or_else(|| ScanError::ProbeExecution("IP header buffer too small".to_string()))?;
            ip_packet.set_version(4);
            ip_packet.set_header_length(5);
            ip_packet.set_total_length(total_len as u16);
            ip_packet.set_identification(self.ip_id);
            ip_packet.set_flags(2); // don't fragment
            ip_packet.set_ttl(self.ttl);
            ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
            ip_packet.set_source(self.source_ip);
            ip_packet.set_destination(self.dest_ip);

            let checksum = pnet::packet::ipv4::checksum(&ip_packet.to_immutable());
            ip_packet.set_checksum(checksum);
        }

        {
            let mut tcp_packet = MutableTcpPacket::new(&mut packet_buf[IP_HEADER_LEN..])
                .ok_or_else(|| ScanError::ProbeExecution("TCP header buffer too small".to_string()))?;
            tcp_packet.set_source(self.source_port);
            tcp_packet.set_destination(self.dest_port);
            tcp_packet.set_sequence(self.seq_num);
            tcp_packet.set_acknowledgement(0);
            tcp_packet.set_data_offset(5);
            tcp_packet.set_flags(TcpFlags::SYN);
            tcp_packet.set_window(self.window_size);
            tcp_packet.set_urgent_ptr(0);

            let checksum = pnet::packet::tcp::ipv4_checksum(&tcp_packet.to_immutable(), &self.source_ip, &self.dest_ip);
            tcp_packet.set_checksum(checksum);
        }

        Ok(packet_buf)
    }
}

/// Fields of a received TCP segment that matter for port and OS classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpResponse {
    pub source_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub source_port: u16,
    pub dest_port: u16,
    pub flags: u16,
    pub ttl: u8,
    pub window_size: u16,
}

impl TcpResponse {
    /// Parse an IPv4 datagram carrying TCP
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let ip_packet = Ipv4Packet::new(packet)?;
        if ip_packet.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
            return None;
        }

        let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
        let tcp_packet = TcpPacket::new(packet.get(ip_header_len..)?)?;

        Some(Self {
            source_ip: ip_packet.get_source(),
            dest_ip: ip_packet.get_destination(),
            source_port: tcp_packet.get_source(),
            dest_port: tcp_packet.get_destination(),
            flags: tcp_packet.get_flags(),
            ttl: ip_packet.get_ttl(),
            window_size: tcp_packet.get_window(),
        })
    }

    /// True if this segment answers a probe sent from `source_port` to `target:port`
    pub fn answers(&self, target: Ipv4Addr, port: u16, source_port: u16) -> bool {
        self.source_ip == target && self.source_port == port && self.dest_port == source_port
    }

    pub fn is_syn_ack(&self) -> bool {
        let syn_ack = TcpFlags::SYN | TcpFlags::ACK;
        self.flags & syn_ack == syn_ack
    }

    pub fn is_rst(&self) -> bool {
        self.flags & TcpFlags::RST != 0
    }

    pub fn signal(&self) -> TcpSignal {
        TcpSignal {
            ttl: self.ttl,
            window: self.window_size,
        }
    }
}
