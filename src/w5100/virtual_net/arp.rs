//! The virtual ARP responder.
//!
//! Answers ARP requests for the virtual gateway address
//! ([`super::VIRTUAL_GATEWAY_IP`]) so guest software that ARPs for
//! its default route before sending anything gets a believable
//! reply, without any real Ethernet segment existing.

use super::eth::{EthHeader, ETHERTYPE_ARP};
use super::{GATEWAY_MAC, VIRTUAL_GATEWAY_IP};

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;
const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

/// If `payload` is an ARP request asking "who has
/// [`VIRTUAL_GATEWAY_IP`]", build the reply frame.
pub fn handle(eth: &EthHeader, payload: &[u8]) -> Option<Vec<u8>> {
    if eth.ethertype != ETHERTYPE_ARP || payload.len() < 28 {
        return None;
    }
    let htype = u16::from_be_bytes([payload[0], payload[1]]);
    let ptype = u16::from_be_bytes([payload[2], payload[3]]);
    let hlen = payload[4];
    let plen = payload[5];
    let opcode = u16::from_be_bytes([payload[6], payload[7]]);
    if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || hlen != 6 || plen != 4 {
        return None;
    }
    if opcode != OP_REQUEST {
        return None;
    }
    let mut sender_mac = [0u8; 6];
    sender_mac.copy_from_slice(&payload[8..14]);
    let mut sender_ip = [0u8; 4];
    sender_ip.copy_from_slice(&payload[14..18]);
    let mut target_ip = [0u8; 4];
    target_ip.copy_from_slice(&payload[24..28]);

    if target_ip != VIRTUAL_GATEWAY_IP {
        return None;
    }

    let mut reply_payload = Vec::with_capacity(28);
    reply_payload.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
    reply_payload.extend_from_slice(&PTYPE_IPV4.to_be_bytes());
    reply_payload.push(6);
    reply_payload.push(4);
    reply_payload.extend_from_slice(&OP_REPLY.to_be_bytes());
    reply_payload.extend_from_slice(&GATEWAY_MAC);
    reply_payload.extend_from_slice(&VIRTUAL_GATEWAY_IP);
    reply_payload.extend_from_slice(&sender_mac);
    reply_payload.extend_from_slice(&sender_ip);

    let mut frame = Vec::with_capacity(14 + reply_payload.len());
    EthHeader {
        dst: sender_mac,
        src: GATEWAY_MAC,
        ethertype: ETHERTYPE_ARP,
    }
    .write(&mut frame);
    frame.extend_from_slice(&reply_payload);
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_request(target_ip: [u8; 4]) -> (EthHeader, Vec<u8>) {
        let eth = EthHeader {
            dst: [0xff; 6],
            src: [0xaa, 0, 0, 0, 0, 1],
            ethertype: ETHERTYPE_ARP,
        };
        let mut payload = Vec::new();
        payload.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        payload.extend_from_slice(&PTYPE_IPV4.to_be_bytes());
        payload.push(6);
        payload.push(4);
        payload.extend_from_slice(&OP_REQUEST.to_be_bytes());
        payload.extend_from_slice(&eth.src);
        payload.extend_from_slice(&[192, 168, 65, 50]);
        payload.extend_from_slice(&[0; 6]);
        payload.extend_from_slice(&target_ip);
        (eth, payload)
    }

    #[test]
    fn replies_for_the_virtual_gateway() {
        let (eth, payload) = build_request(VIRTUAL_GATEWAY_IP);
        let reply = handle(&eth, &payload).expect("should reply");
        let (reply_eth, reply_payload) = EthHeader::parse(&reply).unwrap();
        assert_eq!(reply_eth.dst, eth.src);
        assert_eq!(reply_eth.src, GATEWAY_MAC);
        let opcode = u16::from_be_bytes([reply_payload[6], reply_payload[7]]);
        assert_eq!(opcode, OP_REPLY);
        assert_eq!(&reply_payload[8..14], &GATEWAY_MAC);
    }

    #[test]
    fn ignores_requests_for_other_hosts() {
        let (eth, payload) = build_request([192, 168, 65, 99]);
        assert!(handle(&eth, &payload).is_none());
    }
}
