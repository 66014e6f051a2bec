//! The virtual DHCP responder.
//!
//! A minimal BOOTP/DHCP server that only ever serves one lease: the
//! single guest that's asking. DISCOVER gets an OFFER, REQUEST gets
//! an ACK; anything else is ignored (§4.6).

use super::eth::{build_udp_frame, EthHeader, UdpDatagram, ETHERTYPE_IPV4};
use super::{SERVER_MAC, VIRTUAL_GATEWAY_IP, VIRTUAL_SUBNET_MASK};
use crate::w5100::regs;

const CLIENT_PORT: u16 = 68;
const SERVER_PORT: u16 = 67;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const DNS_SERVER: [u8; 4] = [8, 8, 8, 8];
/// BOOTREPLY payloads are padded to at least this many bytes (§6).
const MIN_REPLY_LEN: usize = 300;

const OP_BOOTREQUEST: u8 = 1;
const OP_BOOTREPLY: u8 = 2;

const MSG_DISCOVER: u8 = 1;
const MSG_OFFER: u8 = 2;
const MSG_REQUEST: u8 = 3;
const MSG_ACK: u8 = 5;

const LEASE_SECONDS: u32 = 86400;

/// The single lease this responder hands out.
const CLIENT_IP: [u8; 4] = [192, 168, 65, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpPhase {
    Idle,
    Offered,
    Acked,
}

/// Tracks the one in-flight (or completed) DHCP exchange.
///
/// State only ever moves forward (Idle -> Offered -> Acked); a fresh
/// DISCOVER from the same or a different client restarts it at
/// Offered, it never regresses below where it's already been within
/// one exchange.
pub struct DhcpState {
    pub phase: DhcpPhase,
    pub xid: u32,
    pub client_mac: [u8; 6],
}

impl DhcpState {
    pub fn new() -> Self {
        DhcpState {
            phase: DhcpPhase::Idle,
            xid: 0,
            client_mac: [0; 6],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for DhcpState {
    fn default() -> Self {
        Self::new()
    }
}

struct ParsedRequest {
    xid: u32,
    chaddr: [u8; 6],
    msg_type: u8,
}

fn parse_bootp(data: &[u8]) -> Option<ParsedRequest> {
    if data.len() < 240 || data[0] != OP_BOOTREQUEST {
        return None;
    }
    let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let mut chaddr = [0u8; 6];
    chaddr.copy_from_slice(&data[28..34]);
    if data[236..240] != MAGIC_COOKIE {
        return None;
    }
    let mut msg_type = 0u8;
    let mut i = 240;
    while i + 1 < data.len() {
        let opt = data[i];
        if opt == 0xff {
            break;
        }
        if opt == 0 {
            i += 1;
            continue;
        }
        let len = data[i + 1] as usize;
        if opt == 53 && len == 1 && i + 2 < data.len() {
            msg_type = data[i + 2];
        }
        i += 2 + len;
    }
    Some(ParsedRequest { xid, chaddr, msg_type })
}

fn build_reply(req: &ParsedRequest, msg_type: u8) -> Vec<u8> {
    let mut body = vec![0u8; 236];
    body[0] = OP_BOOTREPLY;
    body[1] = 1; // htype ethernet
    body[2] = 6; // hlen
    body[4..8].copy_from_slice(&req.xid.to_be_bytes());
    body[16..20].copy_from_slice(&CLIENT_IP); // yiaddr
    body[20..24].copy_from_slice(&VIRTUAL_GATEWAY_IP); // siaddr
    body[28..34].copy_from_slice(&req.chaddr);
    body.extend_from_slice(&MAGIC_COOKIE);

    body.push(53);
    body.push(1);
    body.push(msg_type);

    body.push(54); // server identifier
    body.push(4);
    body.extend_from_slice(&VIRTUAL_GATEWAY_IP);

    body.push(51); // lease time
    body.push(4);
    body.extend_from_slice(&LEASE_SECONDS.to_be_bytes());

    body.push(1); // subnet mask
    body.push(4);
    body.extend_from_slice(&VIRTUAL_SUBNET_MASK);

    body.push(3); // router
    body.push(4);
    body.extend_from_slice(&VIRTUAL_GATEWAY_IP);

    body.push(6); // DNS
    body.push(4);
    body.extend_from_slice(&DNS_SERVER);

    body.push(255); // end

    if body.len() < MIN_REPLY_LEN {
        body.resize(MIN_REPLY_LEN, 0);
    }
    body
}

/// Handle one inbound UDP datagram if it's a DHCP client message
/// addressed to the server port; returns the reply frame, if any.
/// `common` is the card's common register area: a completed ACK
/// writes the negotiated IP/gateway/mask into `SIPR`/`GAR`/`SUBR`
/// the way the real chip's DHCP client would (§8 scenario 4).
pub fn handle(
    state: &mut DhcpState,
    eth: &EthHeader,
    ip_payload: &[u8],
    common: &mut [u8],
) -> Option<Vec<u8>> {
    if eth.ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    let udp = UdpDatagram::parse(ip_payload)?;
    if udp.dst_port != SERVER_PORT || udp.src_port != CLIENT_PORT {
        return None;
    }
    let req = parse_bootp(udp.payload)?;

    let reply_msg_type = match req.msg_type {
        MSG_DISCOVER => {
            state.phase = DhcpPhase::Offered;
            state.xid = req.xid;
            state.client_mac = req.chaddr;
            log::info!("dhcp: offering {CLIENT_IP:?} to {:02x?} (xid {:#010x})", req.chaddr, req.xid);
            MSG_OFFER
        }
        MSG_REQUEST => {
            state.phase = DhcpPhase::Acked;
            state.xid = req.xid;
            state.client_mac = req.chaddr;
            log::info!("dhcp: acking {CLIENT_IP:?} to {:02x?} (xid {:#010x})", req.chaddr, req.xid);
            common[regs::SIPR as usize..regs::SIPR as usize + 4].copy_from_slice(&CLIENT_IP);
            common[regs::GAR as usize..regs::GAR as usize + 4]
                .copy_from_slice(&VIRTUAL_GATEWAY_IP);
            common[regs::SUBR as usize..regs::SUBR as usize + 4]
                .copy_from_slice(&VIRTUAL_SUBNET_MASK);
            MSG_ACK
        }
        _ => return None,
    };

    let body = build_reply(&req, reply_msg_type);
    let (eth_dst, ip_dst) = match reply_msg_type {
        MSG_OFFER => (super::eth::BROADCAST_MAC, [255, 255, 255, 255]),
        _ => (req.chaddr, CLIENT_IP),
    };
    Some(build_udp_frame(
        eth_dst,
        SERVER_MAC,
        VIRTUAL_GATEWAY_IP,
        ip_dst,
        SERVER_PORT,
        CLIENT_PORT,
        &body,
    ))
}
