//! The virtual TCP terminator.
//!
//! Terminates exactly one guest TCP flow at the synthesized network
//! layer and bridges its payload to a real host socket (after the
//! `192.168.64.0/23` -> `127.0.0.1` redirect, §4.6). A second flow
//! opened while one is already live silently replaces it — see the
//! design notes' decision on that point, carried into
//! [`DESIGN.md`](../../../DESIGN.md).

use std::io::{Read, Write};

use std::time::{Duration, Instant};

use super::eth::{
    build_tcp_frame, EthHeader, Ipv4Header, TcpFlags, TcpSegment, ETHERTYPE_IPV4, TCP_ACK,
    TCP_FIN, TCP_PSH, TCP_RST, TCP_SYN,
};
use crate::w5100::hostsock::{self, HostNet};

const WINDOW: u16 = 0x2000;
const INITIAL_SERVER_SEQ: u32 = 12345;
/// How long a host connect attempt gets before the terminator gives
/// up and answers the guest with RST+ACK (§7, §9).
const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Connecting,
    SynAckSent,
    Established,
    Closing,
    Closed,
}

pub struct VirtualTcp {
    pub client_mac: [u8; 6],
    pub client_ip: [u8; 4],
    pub client_port: u16,
    pub server_ip: [u8; 4],
    pub server_port: u16,
    pub state: FlowState,
    pub host: mio::net::TcpStream,
    pub send_seq: u32,
    pub expect_seq: u32,
    /// Token this flow's host socket is registered under in the
    /// shared [`HostNet`]; always 4 (one past the 4 socket slots).
    pub token: usize,
    /// Deadline after which an unfinished connect answers RST+ACK.
    connect_deadline: Instant,
}

pub const FLOW_TOKEN: usize = 4;

impl VirtualTcp {
    fn open(
        hostnet: &mut HostNet,
        client_mac: [u8; 6],
        client_ip: [u8; 4],
        client_port: u16,
        server_ip: [u8; 4],
        server_port: u16,
        client_isn: u32,
    ) -> std::io::Result<Self> {
        let addr = hostsock::redirect(server_ip, server_port);
        let mut host = hostsock::connect_tcp(addr)?;
        hostnet.register(&mut host, FLOW_TOKEN, mio::Interest::WRITABLE)?;
        Ok(VirtualTcp {
            client_mac,
            client_ip,
            client_port,
            server_ip,
            server_port,
            state: FlowState::Connecting,
            host,
            send_seq: INITIAL_SERVER_SEQ,
            expect_seq: client_isn.wrapping_add(1),
            token: FLOW_TOKEN,
            connect_deadline: Instant::now() + CONNECT_TIMEOUT,
        })
    }

    fn reply(&self, flags: TcpFlags, payload: &[u8]) -> Vec<u8> {
        build_tcp_frame(
            self.client_mac,
            super::GATEWAY_MAC,
            self.server_ip,
            self.client_ip,
            self.server_port,
            self.client_port,
            self.send_seq,
            self.expect_seq,
            flags,
            WINDOW,
            payload,
        )
    }
}

/// Handle one inbound IPv4 frame addressed to a TCP port; opens,
/// forwards to, or tears down the single live flow as needed.
pub fn handle(
    flow: &mut Option<VirtualTcp>,
    hostnet: &mut HostNet,
    eth: &EthHeader,
    ip: &Ipv4Header,
    ip_payload: &[u8],
) -> Option<Vec<u8>> {
    if eth.ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    let seg = TcpSegment::parse(ip_payload)?;

    if seg.flags.contains(TCP_SYN) && !seg.flags.contains(TCP_ACK) {
        if let Some(old) = flow.take() {
            let _ = hostnet.deregister(&mut { old.host });
        }
        let new_flow = VirtualTcp::open(
            hostnet,
            eth.src,
            ip.src,
            seg.src_port,
            ip.dst,
            seg.dst_port,
            seg.seq,
        )
        .ok()?;
        *flow = Some(new_flow);
        return None;
    }

    let f = flow.as_mut()?;
    if seg.src_port != f.client_port || ip.src != f.client_ip {
        return None;
    }

    if seg.flags.contains(TCP_FIN) {
        let _ = f.host.shutdown(std::net::Shutdown::Write);
        f.expect_seq = seg.seq.wrapping_add(1);
        let reply = f.reply(TCP_FIN | TCP_ACK, &[]);
        f.send_seq = f.send_seq.wrapping_add(1);
        f.state = FlowState::Closing;
        return Some(reply);
    }

    if f.state != FlowState::Established {
        if seg.flags.contains(TCP_ACK) && f.state == FlowState::SynAckSent {
            f.state = FlowState::Established;
        }
        return None;
    }

    if !seg.payload.is_empty() {
        let _ = f.host.write_all(seg.payload);
        f.expect_seq = seg.seq.wrapping_add(seg.payload.len() as u32);
        return Some(f.reply(TCP_ACK, &[]));
    }

    None
}

/// Periodic tick: drive the host connect forward and drain any data
/// the host side has sent since the last call.
pub fn poll(flow: &mut Option<VirtualTcp>, hostnet: &mut HostNet) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let Some(f) = flow.as_mut() else {
        return out;
    };

    match f.state {
        FlowState::Connecting => {
            let mut connected = false;
            if let Ok(events) = hostnet.poll(hostsock::POLL_IMMEDIATE) {
                connected = events.iter().any(|(t, _, w)| *t == f.token && *w);
            }
            if connected {
                let reply = f.reply(TCP_SYN | TCP_ACK, &[]);
                f.send_seq = f.send_seq.wrapping_add(1);
                f.state = FlowState::SynAckSent;
                let _ = hostnet.reregister(&mut f.host, f.token, mio::Interest::READABLE);
                out.push(reply);
            } else if Instant::now() >= f.connect_deadline {
                out.push(f.reply(TCP_RST | TCP_ACK, &[]));
                let _ = hostnet.deregister(&mut f.host);
                f.state = FlowState::Closed;
                *flow = None;
            }
        }
        FlowState::Established => {
            let mut buf = [0u8; 1400];
            loop {
                match f.host.read(&mut buf) {
                    Ok(0) => {
                        out.push(f.reply(TCP_FIN | TCP_ACK, &[]));
                        f.send_seq = f.send_seq.wrapping_add(1);
                        f.state = FlowState::Closing;
                        break;
                    }
                    Ok(n) => {
                        out.push(f.reply(TCP_PSH | TCP_ACK, &buf[..n]));
                        f.send_seq = f.send_seq.wrapping_add(n as u32);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
        }
        FlowState::Closing | FlowState::Closed | FlowState::SynAckSent => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::w5100::virtual_net::eth::build_tcp_frame;
    use std::io::Read as _;
    use std::net::TcpListener;

    #[test]
    fn opens_a_flow_on_syn_and_forwards_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let mut hostnet = HostNet::new().unwrap();
        let mut flow: Option<VirtualTcp> = None;

        let eth = EthHeader {
            dst: super::super::GATEWAY_MAC,
            src: [2, 0, 0, 0, 0, 9],
            ethertype: ETHERTYPE_IPV4,
        };
        let ip = Ipv4Header {
            protocol: super::super::eth::PROTO_TCP,
            id: 0,
            ttl: 64,
            src: [192, 168, 64, 5],
            dst: [192, 168, 64, 200],
        };
        let syn = build_tcp_frame(
            eth.dst, eth.src, ip.src, ip.dst, 5000, port, 42, 0, TCP_SYN, WINDOW, &[],
        );
        let (_, ip_payload) = Ipv4Header::parse(&syn[14..]).unwrap();
        let reply = handle(&mut flow, &mut hostnet, &eth, &ip, ip_payload);
        assert!(reply.is_none());
        assert!(flow.is_some());
    }

    #[test]
    fn connect_timeout_answers_rst_ack_and_drops_the_flow() {
        // Port 1 is never listening locally, so the non-blocking
        // connect never completes; once the deadline passes, poll
        // should answer RST+ACK and drop the flow (§7).
        let mut hostnet = HostNet::new().unwrap();
        let mut flow = Some(
            VirtualTcp::open(&mut hostnet, [2, 0, 0, 0, 0, 9], [192, 168, 64, 5], 5000, [127, 0, 0, 1], 1, 42)
                .unwrap(),
        );
        flow.as_mut().unwrap().connect_deadline = Instant::now() - Duration::from_millis(1);

        let replies = poll(&mut flow, &mut hostnet);
        assert_eq!(replies.len(), 1);
        let (_, rest) = EthHeader::parse(&replies[0]).unwrap();
        let (_, rest) = Ipv4Header::parse(rest).unwrap();
        let seg = TcpSegment::parse(rest).unwrap();
        assert!(seg.flags.contains(TCP_RST));
        assert!(seg.flags.contains(TCP_ACK));
        assert!(flow.is_none());
    }
}
