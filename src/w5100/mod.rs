//! The W5100 register file: indirect addressing, socket command
//! dispatch, and the bridge into the synthesized network.
//!
//! Grounded on the register map and socket state machine in the
//! Hubris `w5100-spi` driver, adapted from a chip talking over SPI
//! to one answering bus reads/writes directly out of a byte array.

pub mod hostsock;
pub mod regs;
pub mod socket;
pub mod virtual_net;

use std::io::{Read, Write};

use log::{debug, info, trace, warn};

use crate::bus::{BusAccess, Peripheral};
use socket::{HostHandle, Protocol, SocketCommand, SocketSlot, SocketStatus};
use virtual_net::VirtualNet;

/// Soft-switch offsets within the card's 16-byte `$C0n0..$C0nF`
/// window (§4.2): Mode, Address High, Address Low, Data at 4..7.
const PSW_MODE: u8 = 4;
const PSW_ADDR_HI: u8 = 5;
const PSW_ADDR_LO: u8 = 6;
const PSW_DATA: u8 = 7;

/// MACRAW SEND frames longer than this are dropped rather than
/// handed to the virtual network (§7).
const MAX_MACRAW_FRAME: usize = 1600;

/// The emulated Uthernet II card: a W5100 register file plus the
/// host-socket and virtual-network machinery behind it.
pub struct Uthernet2 {
    memory: [u8; regs::MEMORY_SIZE],
    addr_ptr: u16,
    sockets: [SocketSlot; regs::NUM_SOCKETS],
    net: VirtualNet,
    slot: u8,
}

impl Uthernet2 {
    pub fn new() -> Self {
        let mut card = Uthernet2 {
            memory: [0; regs::MEMORY_SIZE],
            addr_ptr: 0,
            sockets: std::array::from_fn(|_| SocketSlot::new()),
            net: VirtualNet::new().expect("local socket multiplexer for virtual TCP"),
            slot: 0,
        };
        card.reset();
        card
    }

    /// Record which Apple II slot (1..7) the dispatcher installed
    /// this card into; used only for logging (§6, §10.3).
    pub fn set_slot(&mut self, slot: u8) {
        info!("uthernet2: installed in slot {slot}");
        self.slot = slot;
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Full power-on reset (also triggered by setting `MR_RST`).
    fn reset(&mut self) {
        self.memory.fill(0);
        self.addr_ptr = 0;
        for s in &mut self.sockets {
            s.reset();
        }
        self.net.reset();
        self.memory[regs::SHAR as usize..regs::SHAR as usize + 6]
            .copy_from_slice(&regs::DEFAULT_MAC);
        self.memory[regs::SIPR as usize..regs::SIPR as usize + 4]
            .copy_from_slice(&regs::DEFAULT_IP);
        self.memory[regs::GAR as usize..regs::GAR as usize + 4]
            .copy_from_slice(&regs::DEFAULT_GATEWAY);
        self.memory[regs::SUBR as usize..regs::SUBR as usize + 4]
            .copy_from_slice(&regs::DEFAULT_SUBNET);
        self.memory[regs::RTR as usize] = (regs::DEFAULT_RTR >> 8) as u8;
        self.memory[regs::RTR as usize + 1] = (regs::DEFAULT_RTR & 0xff) as u8;
        self.memory[regs::RCR as usize] = regs::DEFAULT_RCR;
        self.memory[regs::RMSR as usize] = regs::DEFAULT_RMSR;
        self.memory[regs::TMSR as usize] = regs::DEFAULT_TMSR;
        for n in 0..regs::NUM_SOCKETS {
            self.set_status(n, SocketStatus::Closed);
        }
        debug!("w5100 reset");
    }

    /// Periodic tick: an optional convenience for hosts that want to
    /// drain every socket proactively rather than relying purely on
    /// the read-triggered polling in [`Self::mem_read`] (§4.2, §5).
    /// Both paths call [`Self::socket_poll`]; calling this on top of
    /// register reads is redundant but harmless.
    pub fn poll(&mut self) {
        for n in 0..regs::NUM_SOCKETS {
            self.socket_poll(n);
        }
    }

    /// Drive one socket's host side forward: pull any bytes the host
    /// peer has sent, and for MACRAW, also drain any synthesized
    /// replies from the virtual network before copying staged bytes
    /// into the guest-visible RX ring.
    fn socket_poll(&mut self, n: usize) {
        self.pull_host_data(n);
        if n == 0 && self.sockets[0].macraw {
            let replies = self.net.poll();
            for r in replies {
                self.inject_macraw_frame(0, &r);
            }
        }
        self.drain_staging_to_ring(n);
    }

    fn status(&self, n: usize) -> SocketStatus {
        match self.memory[(regs::socket_base(n) + regs::SN_SR) as usize] {
            0x13 => SocketStatus::Init,
            0x14 => SocketStatus::Listen,
            0x15 => SocketStatus::SynSent,
            0x16 => SocketStatus::SynRecv,
            0x17 => SocketStatus::Established,
            0x18 => SocketStatus::FinWait,
            0x1a => SocketStatus::Closing,
            0x1b => SocketStatus::TimeWait,
            0x1c => SocketStatus::CloseWait,
            0x1d => SocketStatus::LastAck,
            0x22 => SocketStatus::Udp,
            0x32 => SocketStatus::IpRaw,
            0x42 => SocketStatus::MacRaw,
            _ => SocketStatus::Closed,
        }
    }

    fn set_status(&mut self, n: usize, status: SocketStatus) {
        self.memory[(regs::socket_base(n) + regs::SN_SR) as usize] = status.into();
    }

    fn port(&self, base: u16) -> u16 {
        u16::from_be_bytes([
            self.memory[base as usize + regs::SN_PORT as usize],
            self.memory[base as usize + regs::SN_PORT as usize + 1],
        ])
    }

    fn dest(&self, base: u16) -> ([u8; 4], u16) {
        let mut ip = [0u8; 4];
        ip.copy_from_slice(
            &self.memory[base as usize + regs::SN_DIPR as usize..base as usize + regs::SN_DIPR as usize + 4],
        );
        let port = u16::from_be_bytes([
            self.memory[base as usize + regs::SN_DPORT as usize],
            self.memory[base as usize + regs::SN_DPORT as usize + 1],
        ]);
        (ip, port)
    }

    // -- indirect addressing --------------------------------------

    /// Which socket, if any, owns the register page `addr` falls
    /// in. Socket `n`'s page is `0x0400 + 0x100·n .. +0x100` (§3).
    fn socket_for_register_addr(addr: u16) -> Option<usize> {
        if (0x0400..0x0400 + 0x100 * regs::NUM_SOCKETS as u16).contains(&addr) {
            Some(((addr - 0x0400) / 0x100) as usize)
        } else {
            None
        }
    }

    fn mem_read(&mut self, addr: u16) -> u8 {
        if addr as usize >= regs::MEMORY_SIZE {
            return 0;
        }
        if let Some(n) = Self::socket_for_register_addr(addr) {
            // Reads of Sn_SR/Sn_RX_RSR/Sn_TX_FSR always observe the
            // result of polling the socket during this same read (§5).
            self.socket_poll(n);
            let base = regs::socket_base(n);
            if addr == base + regs::SN_TX_FSR || addr == base + regs::SN_TX_FSR + 1 {
                let rd = self.reg16(base + regs::SN_TX_RD);
                let wr = self.reg16(base + regs::SN_TX_WR);
                let fsr = regs::SOCKET_BUF_SIZE.wrapping_sub(wr.wrapping_sub(rd));
                return self.hi_lo(fsr, addr == base + regs::SN_TX_FSR);
            }
            if addr == base + regs::SN_RX_RSR || addr == base + regs::SN_RX_RSR + 1 {
                // By the time this read observes it, socket_poll above
                // has already drained any staged bytes into the 2 KiB
                // ring, MACRAW included, so the ring's own fill level
                // is always the right answer here (§3, §8 scenario 4).
                let rd = self.reg16(base + regs::SN_RX_RD);
                let rsr = self.sockets[n].rx_write_ptr.wrapping_sub(rd);
                return self.hi_lo(rsr, addr == base + regs::SN_RX_RSR);
            }
        }
        self.memory[addr as usize]
    }

    fn reg16(&self, addr: u16) -> u16 {
        u16::from_be_bytes([self.memory[addr as usize], self.memory[addr as usize + 1]])
    }

    fn hi_lo(&self, val: u16, want_hi: bool) -> u8 {
        if want_hi {
            (val >> 8) as u8
        } else {
            (val & 0xff) as u8
        }
    }

    /// Write the mode register, handling the reset-on-bit-7 behavior
    /// shared by the direct Mode soft-switch and indirect writes
    /// targeting address `0x0000` (§4.2).
    fn write_mode(&mut self, val: u8) {
        if val & regs::MR_RST != 0 {
            self.reset();
            self.memory[regs::MR as usize] = val & !regs::MR_RST;
        } else {
            self.memory[regs::MR as usize] = val;
        }
    }

    fn mem_write(&mut self, addr: u16, val: u8) {
        if addr as usize >= regs::MEMORY_SIZE {
            return;
        }
        if addr == regs::MR {
            self.write_mode(val);
            return;
        }
        for n in 0..regs::NUM_SOCKETS {
            let base = regs::socket_base(n);
            if addr == base + regs::SN_CR {
                if let Some(cmd) = SocketCommand::from_byte(val) {
                    self.exec_command(n, cmd);
                } else {
                    warn!("socket {n}: unknown command {val:#04x}");
                }
                // Sn_CR always reads back zero once the command has
                // been accepted (§4.3).
                self.memory[addr as usize] = 0;
                return;
            }
            if Self::is_read_only_socket_register(base, addr) {
                debug!("socket {n}: ignored write to read-only register {addr:#06x}");
                return;
            }
        }
        self.memory[addr as usize] = val;
    }

    /// Sn_SR, Sn_TX_FSR and Sn_RX_RSR are computed/observed, never
    /// settable by the guest (§10.5).
    fn is_read_only_socket_register(base: u16, addr: u16) -> bool {
        addr == base + regs::SN_SR
            || addr == base + regs::SN_TX_FSR
            || addr == base + regs::SN_TX_FSR + 1
            || addr == base + regs::SN_RX_RSR
            || addr == base + regs::SN_RX_RSR + 1
    }

    // -- socket command dispatch ------------------------------------

    fn exec_command(&mut self, n: usize, cmd: SocketCommand) {
        let base = regs::socket_base(n);
        trace!("socket {n}: command {cmd:?}");
        match cmd {
            SocketCommand::Open => self.cmd_open(n, base),
            SocketCommand::Listen => self.cmd_listen(n, base),
            SocketCommand::Connect => self.cmd_connect(n, base),
            SocketCommand::Disconnect => self.cmd_disconnect(n, base),
            SocketCommand::Close => self.cmd_close(n, base),
            SocketCommand::Send => self.cmd_send(n, base),
            SocketCommand::Recv => self.cmd_recv(n, base),
        }
    }

    /// RECV acknowledges the software's `Sn_RX_RD` write; once the
    /// ring is fully drained, both the staging buffer and `Sn_RX_RD`
    /// snap back to the bank base (§4.3, §8 "MACRAW RECV... reads 0").
    fn cmd_recv(&mut self, n: usize, base: u16) {
        self.drain_staging_to_ring(n);
        let rd = self.reg16(base + regs::SN_RX_RD);
        if self.sockets[n].rx_write_ptr == rd && self.sockets[n].rx_staging.is_empty() {
            self.sockets[n].rx_write_ptr = 0;
            self.memory[(base + regs::SN_RX_RD) as usize] = 0;
            self.memory[(base + regs::SN_RX_RD) as usize + 1] = 0;
        }
    }

    fn cmd_open(&mut self, n: usize, base: u16) {
        let mr = self.memory[base as usize + regs::SN_MR as usize];
        let proto = Protocol::from_mr(mr);
        self.sockets[n].reset();
        let status = match proto {
            Protocol::Tcp => SocketStatus::Init,
            Protocol::Udp => {
                let port = self.port(base);
                match hostsock::bind_udp(std::net::SocketAddr::new(
                    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                    port,
                )) {
                    Ok(sock) => self.sockets[n].handle = HostHandle::Udp(sock),
                    Err(e) => debug!("socket {n}: udp bind failed: {e}"),
                }
                SocketStatus::Udp
            }
            Protocol::IpRaw => SocketStatus::IpRaw,
            Protocol::MacRaw if n == 0 => {
                self.sockets[n].macraw = true;
                SocketStatus::MacRaw
            }
            Protocol::MacRaw | Protocol::Closed => SocketStatus::Closed,
        };
        info!("socket {n}: opened as {proto:?}, status {status:?}");
        self.set_status(n, status);
    }

    fn cmd_listen(&mut self, n: usize, base: u16) {
        if self.status(n) != SocketStatus::Init {
            return;
        }
        let port = self.port(base);
        match hostsock::listen_tcp(std::net::SocketAddr::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            port,
        )) {
            Ok(listener) => {
                info!("socket {n}: listening on port {port}");
                self.sockets[n].handle = HostHandle::TcpListener(listener);
                self.set_status(n, SocketStatus::Listen);
            }
            Err(e) => debug!("socket {n}: listen on port {port} failed: {e}"),
        }
    }

    fn cmd_connect(&mut self, n: usize, base: u16) {
        if self.status(n) != SocketStatus::Init {
            return;
        }
        let (dip, dport) = self.dest(base);
        let addr = hostsock::redirect(dip, dport);
        match hostsock::connect_tcp(addr) {
            Ok(stream) => {
                info!("socket {n}: connecting to {addr}");
                self.sockets[n].handle = HostHandle::TcpStream(stream);
                self.sockets[n].connecting = true;
                self.set_status(n, SocketStatus::SynSent);
            }
            Err(e) => debug!("socket {n}: connect to {addr} failed: {e}"),
        }
    }

    fn cmd_disconnect(&mut self, n: usize, _base: u16) {
        if let HostHandle::TcpStream(s) = &self.sockets[n].handle {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
        self.sockets[n].reset();
        self.set_status(n, SocketStatus::Closed);
    }

    fn cmd_close(&mut self, n: usize, _base: u16) {
        if let HostHandle::TcpStream(s) = &self.sockets[n].handle {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
        self.sockets[n].reset();
        self.set_status(n, SocketStatus::Closed);
    }

    fn cmd_send(&mut self, n: usize, base: u16) {
        let data = self.read_tx_ring(n, base);
        if data.is_empty() {
            return;
        }
        if self.sockets[n].macraw {
            if data.len() > MAX_MACRAW_FRAME {
                warn!("socket {n}: macraw send of {} bytes dropped, over the {MAX_MACRAW_FRAME} byte limit", data.len());
                return;
            }
            let replies = self.net.handle_frame(&data, &mut self.memory);
            for r in replies {
                self.inject_macraw_frame(n, &r);
            }
            return;
        }
        match &mut self.sockets[n].handle {
            HostHandle::TcpStream(s) => {
                if let Err(e) = s.write_all(&data) {
                    warn!("socket {n}: write failed: {e}");
                }
            }
            HostHandle::Udp(u) => {
                let (dip, dport) = self.dest(base);
                let addr = hostsock::redirect(dip, dport);
                if let Err(e) = u.send_to(&data, addr) {
                    warn!("socket {n}: sendto {addr} failed: {e}");
                }
            }
            _ => {}
        }
    }

    fn read_tx_ring(&mut self, n: usize, base: u16) -> Vec<u8> {
        let rd = self.reg16(base + regs::SN_TX_RD);
        let wr = self.reg16(base + regs::SN_TX_WR);
        let len = wr.wrapping_sub(rd) as usize;
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            let idx = regs::tx_base(n) as usize
                + (rd.wrapping_add(i as u16) % regs::SOCKET_BUF_SIZE) as usize;
            data.push(self.memory[idx]);
        }
        let addr = (base + regs::SN_TX_RD) as usize;
        self.memory[addr] = (wr >> 8) as u8;
        self.memory[addr + 1] = (wr & 0xff) as u8;
        data
    }

    /// Stage a MACRAW frame for socket `n`, length-prefixed the way
    /// the real chip delivers raw frames (§4.4).
    fn inject_macraw_frame(&mut self, n: usize, frame: &[u8]) {
        let mut framed = Vec::with_capacity(2 + frame.len());
        framed.extend_from_slice(&(frame.len() as u16).to_be_bytes());
        framed.extend_from_slice(frame);
        self.sockets[n].rx_staging.push(&framed);
    }

    // -- host side polling -------------------------------------------

    fn pull_host_data(&mut self, n: usize) {
        match self.status(n) {
            SocketStatus::SynSent => {
                let established = matches!(&self.sockets[n].handle, HostHandle::TcpStream(s) if s.peer_addr().is_ok());
                if established {
                    self.sockets[n].connecting = false;
                    self.set_status(n, SocketStatus::Established);
                }
            }
            SocketStatus::Listen => {
                let accepted = if let HostHandle::TcpListener(l) = &self.sockets[n].handle {
                    l.accept().ok()
                } else {
                    None
                };
                if let Some((stream, peer)) = accepted {
                    info!("socket {n}: accepted connection from {peer}");
                    self.sockets[n].handle = HostHandle::TcpStream(stream);
                    self.set_status(n, SocketStatus::Established);
                }
            }
            SocketStatus::Established => {
                let mut buf = [0u8; 1400];
                let mut closed = false;
                if let HostHandle::TcpStream(s) = &mut self.sockets[n].handle {
                    loop {
                        match s.read(&mut buf) {
                            Ok(0) => {
                                closed = true;
                                break;
                            }
                            Ok(len) => self.sockets[n].rx_staging.push(&buf[..len]),
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(_) => {
                                closed = true;
                                break;
                            }
                        }
                    }
                }
                if closed {
                    self.set_status(n, SocketStatus::CloseWait);
                }
            }
            SocketStatus::Udp => {
                let mut buf = [0u8; 1400];
                if let HostHandle::Udp(u) = &mut self.sockets[n].handle {
                    loop {
                        match u.recv_from(&mut buf) {
                            Ok((len, _src)) => self.sockets[n].rx_staging.push(&buf[..len]),
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(_) => break,
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn drain_staging_to_ring(&mut self, n: usize) {
        let base = regs::socket_base(n);
        let rd = self.reg16(base + regs::SN_RX_RD);
        let used = self.sockets[n].rx_write_ptr.wrapping_sub(rd);
        let free = regs::SOCKET_BUF_SIZE.saturating_sub(used) as usize;
        let available = self.sockets[n].rx_staging.len();
        let to_copy = available.min(free);
        if to_copy == 0 {
            return;
        }
        let head = self.sockets[n].rx_staging.head;
        let chunk: Vec<u8> = self.sockets[n].rx_staging.buf[head..head + to_copy].to_vec();
        for b in chunk {
            let idx = regs::rx_base(n) as usize
                + (self.sockets[n].rx_write_ptr % regs::SOCKET_BUF_SIZE) as usize;
            self.memory[idx] = b;
            self.sockets[n].rx_write_ptr = self.sockets[n].rx_write_ptr.wrapping_add(1);
        }
        self.sockets[n].rx_staging.consume(to_copy);
    }
}

impl Default for Uthernet2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for Uthernet2 {
    fn init(&mut self) {
        self.reset();
    }

    fn handle(&mut self, access: BusAccess) -> u8 {
        if let Some(ploc) = access.ploc {
            // The card carries no boot ROM; detection probes see
            // fixed identification bytes at two offsets (§4.2).
            return match ploc {
                0x05 => 0x38,
                0x07 => 0x18,
                _ => 0,
            };
        }
        let Some(psw) = access.psw else { return 0 };
        match (psw, access.val) {
            (PSW_MODE, None) => self.memory[regs::MR as usize],
            (PSW_MODE, Some(v)) => {
                self.write_mode(v);
                0
            }
            (PSW_ADDR_HI, None) => (self.addr_ptr >> 8) as u8,
            (PSW_ADDR_HI, Some(v)) => {
                self.addr_ptr = (self.addr_ptr & 0x00ff) | ((v as u16) << 8);
                0
            }
            (PSW_ADDR_LO, None) => (self.addr_ptr & 0xff) as u8,
            (PSW_ADDR_LO, Some(v)) => {
                self.addr_ptr = (self.addr_ptr & 0xff00) | v as u16;
                0
            }
            (PSW_DATA, None) => {
                let byte = self.mem_read(self.addr_ptr);
                if self.memory[regs::MR as usize] & regs::MR_AI != 0 {
                    self.addr_ptr = self.addr_ptr.wrapping_add(1);
                }
                byte
            }
            (PSW_DATA, Some(v)) => {
                self.mem_write(self.addr_ptr, v);
                if self.memory[regs::MR as usize] & regs::MR_AI != 0 {
                    self.addr_ptr = self.addr_ptr.wrapping_add(1);
                }
                0
            }
            _ => 0,
        }
    }
}
