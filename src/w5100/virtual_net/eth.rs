//! Ethernet/IPv4/UDP/TCP header parsing and synthesis.
//!
//! Every frame the virtual network hands back to the guest is built
//! here; [`arp`](super::arp), [`dhcp`](super::dhcp) and
//! [`tcp`](super::tcp) only decide *what* to say, not how to wrap it.

use super::checksum::{internet_checksum, pseudo_header_checksum};

pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

pub const PROTO_UDP: u8 = 17;
pub const PROTO_TCP: u8 = 6;

pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

#[derive(Debug, Clone, Copy)]
pub struct EthHeader {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ethertype: u16,
}

impl EthHeader {
    pub fn parse(frame: &[u8]) -> Option<(Self, &[u8])> {
        if frame.len() < 14 {
            return None;
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&frame[0..6]);
        src.copy_from_slice(&frame[6..12]);
        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
        Some((Self { dst, src, ethertype }, &frame[14..]))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.dst);
        out.extend_from_slice(&self.src);
        out.extend_from_slice(&self.ethertype.to_be_bytes());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header {
    pub protocol: u8,
    pub id: u16,
    pub ttl: u8,
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4Header {
    /// Parse a header (assumed to carry no options, i.e. IHL==5) and
    /// return it with the remaining payload.
    pub fn parse(data: &[u8]) -> Option<(Self, &[u8])> {
        if data.len() < 20 {
            return None;
        }
        if data[0] >> 4 != 4 {
            return None;
        }
        let ihl = (data[0] & 0x0f) as usize * 4;
        if data.len() < ihl {
            return None;
        }
        let total_length = u16::from_be_bytes([data[2], data[3]]) as usize;
        let id = u16::from_be_bytes([data[4], data[5]]);
        let ttl = data[8];
        let protocol = data[9];
        let mut src = [0u8; 4];
        let mut dst = [0u8; 4];
        src.copy_from_slice(&data[12..16]);
        dst.copy_from_slice(&data[16..20]);
        let end = total_length.min(data.len());
        Some((
            Self { protocol, id, ttl, src, dst },
            &data[ihl..end.max(ihl)],
        ))
    }

    pub fn write(&self, payload_len: usize, out: &mut Vec<u8>) {
        let total_length = (20 + payload_len) as u16;
        let mut header = vec![
            0x45,
            0x00,
            (total_length >> 8) as u8,
            (total_length & 0xff) as u8,
            (self.id >> 8) as u8,
            (self.id & 0xff) as u8,
            0x40,
            0x00,
            self.ttl,
            self.protocol,
            0x00,
            0x00,
        ];
        header.extend_from_slice(&self.src);
        header.extend_from_slice(&self.dst);
        let sum = internet_checksum(&header);
        header[10] = (sum >> 8) as u8;
        header[11] = (sum & 0xff) as u8;
        out.extend_from_slice(&header);
    }
}

/// Build a full Ethernet+IPv4+UDP frame.
#[allow(clippy::too_many_arguments)]
pub fn build_udp_frame(
    eth_dst: [u8; 6],
    eth_src: [u8; 6],
    ip_src: [u8; 4],
    ip_dst: [u8; 4],
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut udp = Vec::with_capacity(8 + payload.len());
    udp.extend_from_slice(&src_port.to_be_bytes());
    udp.extend_from_slice(&dst_port.to_be_bytes());
    udp.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    let csum = pseudo_header_checksum(ip_src, ip_dst, PROTO_UDP, &udp);
    udp[6] = (csum >> 8) as u8;
    udp[7] = (csum & 0xff) as u8;

    let mut frame = Vec::with_capacity(14 + 20 + udp.len());
    EthHeader { dst: eth_dst, src: eth_src, ethertype: ETHERTYPE_IPV4 }.write(&mut frame);
    Ipv4Header { protocol: PROTO_UDP, id: 0, ttl: 64, src: ip_src, dst: ip_dst }
        .write(udp.len(), &mut frame);
    frame.extend_from_slice(&udp);
    frame
}

bitflags::bitflags! {
    /// The TCP header's control bits this terminator actually acts
    /// on (urgent/ECN/CWR aren't modeled).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
    }
}

pub const TCP_FIN: TcpFlags = TcpFlags::FIN;
pub const TCP_SYN: TcpFlags = TcpFlags::SYN;
pub const TCP_RST: TcpFlags = TcpFlags::RST;
pub const TCP_PSH: TcpFlags = TcpFlags::PSH;
pub const TCP_ACK: TcpFlags = TcpFlags::ACK;

/// Build a full Ethernet+IPv4+TCP segment (no options, 20-byte header).
#[allow(clippy::too_many_arguments)]
pub fn build_tcp_frame(
    eth_dst: [u8; 6],
    eth_src: [u8; 6],
    ip_src: [u8; 4],
    ip_dst: [u8; 4],
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    window: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut tcp = Vec::with_capacity(20 + payload.len());
    tcp.extend_from_slice(&src_port.to_be_bytes());
    tcp.extend_from_slice(&dst_port.to_be_bytes());
    tcp.extend_from_slice(&seq.to_be_bytes());
    tcp.extend_from_slice(&ack.to_be_bytes());
    tcp.push(0x50); // data offset = 5 words, no options
    tcp.push(flags.bits());
    tcp.extend_from_slice(&window.to_be_bytes());
    tcp.extend_from_slice(&[0, 0]); // checksum placeholder
    tcp.extend_from_slice(&[0, 0]); // urgent pointer
    tcp.extend_from_slice(payload);
    let csum = pseudo_header_checksum(ip_src, ip_dst, PROTO_TCP, &tcp);
    tcp[16] = (csum >> 8) as u8;
    tcp[17] = (csum & 0xff) as u8;

    let mut frame = Vec::with_capacity(14 + 20 + tcp.len());
    EthHeader { dst: eth_dst, src: eth_src, ethertype: ETHERTYPE_IPV4 }.write(&mut frame);
    Ipv4Header { protocol: PROTO_TCP, id: 0, ttl: 64, src: ip_src, dst: ip_dst }
        .write(tcp.len(), &mut frame);
    frame.extend_from_slice(&tcp);
    frame
}

/// Parsed view of an inbound TCP segment's fields we actually act on.
pub struct TcpSegment<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub payload: &'a [u8],
}

impl<'a> TcpSegment<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < 20 {
            return None;
        }
        let data_offset = ((data[12] >> 4) as usize) * 4;
        if data.len() < data_offset {
            return None;
        }
        Some(Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            flags: TcpFlags::from_bits_truncate(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            payload: &data[data_offset..],
        })
    }
}

pub struct UdpDatagram<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

impl<'a> UdpDatagram<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        let end = length.min(data.len()).max(8);
        Some(Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            payload: &data[8..end],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_frame_round_trips_through_parse() {
        let frame = build_udp_frame(
            [1, 2, 3, 4, 5, 6],
            [6, 5, 4, 3, 2, 1],
            [192, 168, 1, 100],
            [192, 168, 1, 1],
            68,
            67,
            b"hello",
        );
        let (eth, rest) = EthHeader::parse(&frame).unwrap();
        assert_eq!(eth.ethertype, ETHERTYPE_IPV4);
        let (ip, rest) = Ipv4Header::parse(rest).unwrap();
        assert_eq!(ip.protocol, PROTO_UDP);
        let udp = UdpDatagram::parse(rest).unwrap();
        assert_eq!(udp.src_port, 68);
        assert_eq!(udp.dst_port, 67);
        assert_eq!(udp.payload, b"hello");
    }

    #[test]
    fn tcp_frame_carries_flags_and_payload() {
        let frame = build_tcp_frame(
            [1, 2, 3, 4, 5, 6],
            [6, 5, 4, 3, 2, 1],
            [127, 0, 0, 1],
            [192, 168, 64, 1],
            80,
            1234,
            100,
            200,
            TCP_SYN | TCP_ACK,
            4096,
            b"",
        );
        let (_, rest) = EthHeader::parse(&frame).unwrap();
        let (_, rest) = Ipv4Header::parse(rest).unwrap();
        let tcp = TcpSegment::parse(rest).unwrap();
        assert_eq!(tcp.flags, TCP_SYN | TCP_ACK);
        assert_eq!(tcp.seq, 100);
        assert_eq!(tcp.ack, 200);
    }
}
