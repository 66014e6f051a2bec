//! The synthesized network behind the W5100's MACRAW socket.
//!
//! Guest software that speaks ARP, DHCP or raw TCP over socket 0's
//! MACRAW mode is answered by these three responders instead of a
//! real Ethernet segment; each one owns its own slice of state and
//! is driven from [`super::W5100::macraw_send`] and
//! [`super::W5100::socket_poll`].

pub mod arp;
pub mod checksum;
pub mod dhcp;
pub mod eth;
pub mod tcp;

use eth::EthHeader;
use hostsock::HostNet;

use super::hostsock;

/// The address the virtual ARP/DHCP responders answer as.
pub const VIRTUAL_GATEWAY_IP: [u8; 4] = [192, 168, 65, 1];
pub const VIRTUAL_SUBNET_MASK: [u8; 4] = [255, 255, 255, 0];
/// Sender MAC used in ARP replies and as the TCP terminator's peer.
pub const GATEWAY_MAC: [u8; 6] = [0x02, 0x00, 0xde, 0xad, 0xbe, 0x01];
/// Source MAC used in DHCP server replies (distinct from the
/// gateway's own MAC, per the virtual-network constants).
pub const SERVER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

/// All state the virtual network layer carries between frames.
pub struct VirtualNet {
    pub dhcp: dhcp::DhcpState,
    pub tcp: Option<tcp::VirtualTcp>,
    pub hostnet: HostNet,
}

impl VirtualNet {
    pub fn new() -> std::io::Result<Self> {
        Ok(VirtualNet {
            dhcp: dhcp::DhcpState::new(),
            tcp: None,
            hostnet: HostNet::new()?,
        })
    }

    pub fn reset(&mut self) {
        self.dhcp.reset();
        self.tcp = None;
    }

    /// Answer one MACRAW frame sent by the guest, if any of the
    /// three responders recognize it. Returns every reply frame to
    /// stage back into socket 0's RX buffer, in order. `common` is
    /// the card's common register area, so a completed DHCP lease
    /// can write `SIPR`/`GAR`/`SUBR` the way the real negotiation
    /// would (§8 scenario 4).
    pub fn handle_frame(&mut self, frame: &[u8], common: &mut [u8]) -> Vec<Vec<u8>> {
        let Some((eth, payload)) = EthHeader::parse(frame) else {
            return Vec::new();
        };

        if let Some(reply) = arp::handle(&eth, payload) {
            return vec![reply];
        }

        if let Some((ip, ip_payload)) = eth::Ipv4Header::parse(payload) {
            if ip.protocol == eth::PROTO_UDP {
                if let Some(reply) = dhcp::handle(&mut self.dhcp, &eth, ip_payload, common) {
                    return vec![reply];
                }
            }
            if ip.protocol == eth::PROTO_TCP {
                if let Some(reply) =
                    tcp::handle(&mut self.tcp, &mut self.hostnet, &eth, &ip, ip_payload)
                {
                    return vec![reply];
                }
            }
        }

        Vec::new()
    }

    /// Periodic tick, independent of any inbound frame: drives the
    /// host TCP connect forward and drains buffered host data.
    pub fn poll(&mut self) -> Vec<Vec<u8>> {
        tcp::poll(&mut self.tcp, &mut self.hostnet)
    }
}
