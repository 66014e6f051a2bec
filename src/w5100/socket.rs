//! Per-socket extension state and the `Sn_SR` / `Sn_CR` encodings.
//!
//! The status and command byte values are the real W5100's; see the
//! Hubris `w5100-spi` driver's `w5100/socket.rs` for the same
//! encoding used by a driver that talks to the physical chip rather
//! than emulating it.

/// `Sn_SR` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketStatus {
    Closed = 0x00,
    Init = 0x13,
    Listen = 0x14,
    SynSent = 0x15,
    SynRecv = 0x16,
    Established = 0x17,
    FinWait = 0x18,
    Closing = 0x1a,
    TimeWait = 0x1b,
    CloseWait = 0x1c,
    LastAck = 0x1d,
    Udp = 0x22,
    IpRaw = 0x32,
    MacRaw = 0x42,
}

impl From<SocketStatus> for u8 {
    fn from(s: SocketStatus) -> u8 {
        s as u8
    }
}

/// `Sn_CR` command values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketCommand {
    Open = 0x01,
    Listen = 0x02,
    Connect = 0x04,
    Disconnect = 0x08,
    Close = 0x10,
    Send = 0x20,
    Recv = 0x40,
}

impl SocketCommand {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Self::Open,
            0x02 => Self::Listen,
            0x04 => Self::Connect,
            0x08 => Self::Disconnect,
            0x10 => Self::Close,
            0x20 => Self::Send,
            0x40 => Self::Recv,
            _ => return None,
        })
    }
}

/// Low nibble of `Sn_MR`: the requested protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Closed,
    Tcp,
    Udp,
    IpRaw,
    MacRaw,
}

impl Protocol {
    pub fn from_mr(mr: u8) -> Self {
        match mr & 0x0f {
            0x01 => Self::Tcp,
            0x02 => Self::Udp,
            0x03 => Self::IpRaw,
            0x04 => Self::MacRaw,
            _ => Self::Closed,
        }
    }
}

/// A host socket bound into one emulated W5100 socket slot.
///
/// These are `mio` socket types rather than `std::net` ones so a
/// single [`mio::Poll`] instance can watch every open card socket
/// for readiness without per-call fd wrapping; see
/// [`super::hostsock`].
pub enum HostHandle {
    None,
    TcpStream(mio::net::TcpStream),
    TcpListener(mio::net::TcpListener),
    Udp(mio::net::UdpSocket),
}

/// The linear staging buffer that regular- and MACRAW-mode RX data
/// is copied into before the emulated CPU reads it out of the
/// `0x6000..0x7FFF` RX bank.
///
/// Regular sockets treat this as a ring of [`super::regs::SOCKET_BUF_SIZE`]
/// bytes (matching the real RX bank); MACRAW mode treats it as a
/// linear append-only buffer of frames, each prefixed with its own
/// 2-byte big-endian length (§4.4).
pub struct RxStaging {
    pub buf: Vec<u8>,
    pub head: usize,
    pub tail: usize,
}

impl RxStaging {
    pub fn new(capacity: usize) -> Self {
        RxStaging {
            buf: vec![0u8; capacity],
            head: 0,
            tail: 0,
        }
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Bytes currently buffered and unread.
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Append bytes at the tail. Regular-socket data and, for
    /// MACRAW, whole length-prefixed frames are pushed the same way;
    /// [`Self::consume`] is what reclaims space, via compaction
    /// rather than modular wraparound, since this buffer is staging
    /// ahead of the guest-visible 2 KiB ring, not the ring itself.
    pub fn push(&mut self, data: &[u8]) {
        let start = self.tail;
        if start + data.len() > self.buf.len() {
            self.buf.resize((start + data.len()).max(self.buf.len() * 2), 0);
        }
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.tail += data.len();
    }

    /// Consume `count` bytes from the head, compacting to
    /// `head == tail == 0` once fully drained (§4.3 RECV).
    pub fn consume(&mut self, count: usize) {
        self.head += count;
        if self.head >= self.tail {
            self.clear();
        }
    }
}

/// Per-socket extension state: everything the register image itself
/// doesn't hold, i.e. the host-side half of the socket.
pub struct SocketSlot {
    pub handle: HostHandle,
    pub connecting: bool,
    pub macraw: bool,
    /// Bytes queued from the host side (or from a virtual responder)
    /// and not yet copied into the guest-visible 2 KiB RX window.
    pub rx_staging: RxStaging,
    /// Monotonic count of bytes ever copied into the guest-visible
    /// RX ring; `rx_write_ptr.wrapping_sub(Sn_RX_RD)` is `Sn_RX_RSR`.
    pub rx_write_ptr: u16,
}

/// 4 KiB staging capacity, per §3 ("a 4 KiB local RX staging buffer
/// with head/tail").
pub const RX_STAGING_CAPACITY: usize = 4096;

impl SocketSlot {
    pub fn new() -> Self {
        SocketSlot {
            handle: HostHandle::None,
            connecting: false,
            macraw: false,
            rx_staging: RxStaging::new(RX_STAGING_CAPACITY),
            rx_write_ptr: 0,
        }
    }

    pub fn reset(&mut self) {
        self.handle = HostHandle::None;
        self.connecting = false;
        self.macraw = false;
        self.rx_staging.clear();
        self.rx_write_ptr = 0;
    }
}

impl Default for SocketSlot {
    fn default() -> Self {
        Self::new()
    }
}
