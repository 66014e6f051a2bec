//! Bridging one emulated socket to a real host BSD socket.
//!
//! Grounded on `cotton_ssdp::udp::mio`: a single [`mio::Poll`]
//! multiplexes every open socket, each registered under a `Token`
//! equal to its W5100 socket index, and a bounded-timeout `poll`
//! call is used wherever the emulator would otherwise have to block.
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};

/// Immediate, non-blocking check: "is this ready right now".
pub const POLL_IMMEDIATE: Duration = Duration::from_millis(0);

/// `192.168.64.0/23`, the virtual LAN a guest's TCP traffic appears
/// to run on. Any connection attempt into this range is redirected
/// to the same port on `127.0.0.1` (§4.6).
const REDIRECT_NET: [u8; 4] = [192, 168, 64, 0];
const REDIRECT_MASK_BITS: u32 = 23;

/// Apply the virtual-LAN redirect rule, if applicable.
pub fn redirect(dest_ip: [u8; 4], dest_port: u16) -> SocketAddr {
    let dest = u32::from_be_bytes(dest_ip);
    let net = u32::from_be_bytes(REDIRECT_NET);
    let mask = !0u32 << (32 - REDIRECT_MASK_BITS);
    let target_ip = if dest & mask == net & mask {
        Ipv4Addr::LOCALHOST
    } else {
        Ipv4Addr::from(dest_ip)
    };
    SocketAddr::new(IpAddr::V4(target_ip), dest_port)
}

/// Multiplexer over every host socket a card currently has open.
pub struct HostNet {
    poll: Poll,
    events: Events,
}

impl HostNet {
    pub fn new() -> io::Result<Self> {
        Ok(HostNet {
            poll: Poll::new()?,
            events: Events::with_capacity(16),
        })
    }

    pub fn register(
        &mut self,
        source: &mut dyn mio::event::Source,
        token: usize,
        interests: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, Token(token), interests)
    }

    pub fn reregister(
        &mut self,
        source: &mut dyn mio::event::Source,
        token: usize,
        interests: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, Token(token), interests)
    }

    pub fn deregister(&mut self, source: &mut dyn mio::event::Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Poll for readiness, returning `(token, readable, writable)`
    /// for each socket with new events.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<Vec<(usize, bool, bool)>> {
        self.poll.poll(&mut self.events, Some(timeout))?;
        Ok(self
            .events
            .iter()
            .map(|e| (e.token().0, e.is_readable(), e.is_writable()))
            .collect())
    }
}

/// Open a non-blocking TCP connection attempt to `addr`.
///
/// Returns immediately; the caller must poll for writability to
/// learn when the connect finishes (or fails).
pub fn connect_tcp(addr: SocketAddr) -> io::Result<mio::net::TcpStream> {
    mio::net::TcpStream::connect(addr)
}

/// Bind a non-blocking listening socket.
pub fn listen_tcp(addr: SocketAddr) -> io::Result<mio::net::TcpListener> {
    mio::net::TcpListener::bind(addr)
}

/// Bind a non-blocking UDP socket.
pub fn bind_udp(addr: SocketAddr) -> io::Result<mio::net::UdpSocket> {
    mio::net::UdpSocket::bind(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_rewrites_virtual_lan() {
        let a = redirect([192, 168, 64, 1], 80);
        assert_eq!(a, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 80));
        let b = redirect([192, 168, 65, 254], 23);
        assert_eq!(b, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 23));
    }

    #[test]
    fn redirect_leaves_other_addresses_alone() {
        let a = redirect([8, 8, 8, 8], 53);
        assert_eq!(a, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53));
    }

    #[test]
    fn redirect_is_idempotent() {
        let once = redirect([192, 168, 64, 10], 443);
        let addr_ip = match once.ip() {
            IpAddr::V4(v4) => v4.octets(),
            _ => unreachable!(),
        };
        let twice = redirect(addr_ip, once.port());
        assert_eq!(once, twice);
    }
}
